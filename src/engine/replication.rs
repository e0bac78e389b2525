use std::time::Instant;

use crate::log::Log;
use crate::rpc::{AppendEntriesArgs, AppendEntriesReply, PeerId, Rpc};
use crate::state_machine::{Command, StateMachine};

use super::{RaftEngine, Role};

impl<C, L, M, R> RaftEngine<C, L, M, R>
where
    C: Command<M> + Clone + Send + 'static,
    L: Log<C> + Send + 'static,
    M: StateMachine + Send + 'static,
    R: Rpc<C> + Send + Sync + 'static,
{
    pub(super) fn dispatch_to_all_peers(&self) {
        let peer_ids: Vec<PeerId> = {
            let s = self.inner.shared.lock().unwrap();
            s.peers.keys().copied().collect()
        };
        for peer_id in peer_ids {
            self.maybe_dispatch_to_peer(peer_id);
        }
    }

    /// Dispatches at most one outstanding `AppendEntries` to `peer_id`, if
    /// due.
    pub(super) fn maybe_dispatch_to_peer(&self, peer_id: PeerId) {
        let now = Instant::now();
        let heartbeat_interval = self.inner.config.heartbeat_interval;
        let max_entries = self.inner.config.max_entries_per_request;

        let dispatch: Option<(AppendEntriesArgs<C>, Option<u64>)> = {
            let mut s = self.inner.shared.lock().unwrap();
            if s.role != Role::Leader {
                return;
            }
            let current_term = s.current_term;
            let commit_index = s.log.commit_index();
            let last_index = s.log.last_index();
            let my_id = s.my_peer_id;

            let peer = match s.peers.get_mut(&peer_id) {
                Some(p) => p,
                None => return,
            };

            // An append whose reply never arrives would otherwise strand
            // this peer forever; clear the flag once it's stale.
            if peer.append_pending {
                if let Some(since) = peer.append_pending_since {
                    if now.duration_since(since) > heartbeat_interval * 2 {
                        peer.append_pending = false;
                        peer.append_pending_since = None;
                    }
                }
            }

            if peer.append_pending {
                return;
            }

            let due_for_heartbeat = peer
                .last_append_instant
                .map(|t| now >= t + heartbeat_interval)
                .unwrap_or(true);
            let has_entries_to_send = peer.next_index <= last_index;
            if !(has_entries_to_send || due_for_heartbeat) {
                return;
            }

            let prev_log_index = peer.next_index - 1;
            let prev_log_term = s.log.term_at(prev_log_index).unwrap_or(0);
            let entries = s.log.entries_from(peer.next_index, max_entries);
            let sent_up_to = if entries.is_empty() {
                None
            } else {
                Some(prev_log_index + entries.len() as u64)
            };

            let peer = s.peers.get_mut(&peer_id).unwrap();
            peer.append_pending = true;
            peer.append_pending_since = Some(now);
            peer.last_append_instant = Some(now);

            Some((
                AppendEntriesArgs {
                    term: current_term,
                    leader_id: my_id,
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit: commit_index,
                },
                sent_up_to,
            ))
        };

        let (args, sent_up_to) = match dispatch {
            Some(d) => d,
            None => return,
        };

        let engine = self.clone();
        self.inner.rpc.send_append_entries(
            peer_id,
            args,
            Box::new(move |reply| match reply {
                Some(reply) => engine.on_append_entries_reply(peer_id, reply, sent_up_to),
                None => engine.clear_append_pending(peer_id),
            }),
        );
    }

    fn clear_append_pending(&self, peer_id: PeerId) {
        let mut s = self.inner.shared.lock().unwrap();
        if let Some(peer) = s.peers.get_mut(&peer_id) {
            peer.append_pending = false;
            peer.append_pending_since = None;
        }
    }

    /// Response handler for `AppendEntries`.
    fn on_append_entries_reply(&self, peer_id: PeerId, reply: AppendEntriesReply, sent_up_to: Option<u64>) {
        let redispatch;
        {
            let mut s = self.inner.shared.lock().unwrap();
            if let Some(peer) = s.peers.get_mut(&peer_id) {
                peer.append_pending = false;
                peer.append_pending_since = None;
            }
            if s.role != Role::Leader {
                return;
            }
            if Self::step_down_locked(&mut s, &self.inner.config, reply.term) {
                return;
            }

            if reply.success {
                let last_index = s.log.last_index();
                let peer = match s.peers.get_mut(&peer_id) {
                    Some(p) => p,
                    None => return,
                };
                if let Some(last_sent_index) = sent_up_to {
                    peer.match_index = last_sent_index;
                    peer.next_index = last_sent_index + 1;
                }
                redispatch = peer.next_index <= last_index;
            } else {
                let peer = match s.peers.get_mut(&peer_id) {
                    Some(p) => p,
                    None => return,
                };
                // Bounded-rewind policy: converges to the first
                // matching index without needing to probe one-by-one.
                if peer.next_index > reply.last_log_index {
                    peer.next_index = reply.last_log_index.max(1);
                } else if peer.next_index > 1 {
                    peer.next_index -= 1;
                }
                redispatch = true;
            }
        }
        if redispatch {
            self.maybe_dispatch_to_peer(peer_id);
        }
    }

    /// Advances `commit_index` as far as quorum replication allows. An entry
    /// from an earlier term is never committed by count alone; only once a
    /// current-term entry at or above it reaches quorum, per the usual Raft
    /// safety argument against counting replicas for old-term entries.
    pub(super) fn advance_commit_index(&self) {
        let mut s = self.inner.shared.lock().unwrap();
        if s.role != Role::Leader {
            return;
        }
        let last_index = s.log.last_index();
        let quorum = 1 + s.peers.len() / 2;
        let current_term = s.current_term;

        let mut n = s.log.commit_index();
        while n < last_index {
            let candidate = n + 1;
            let replicated_count = 1 + s
                .peers
                .values()
                .filter(|p| p.match_index >= candidate)
                .count();
            if replicated_count < quorum {
                break;
            }
            n = candidate;
            if s.log.term_at(candidate) == Some(current_term) {
                s.log.set_commit_index(n);
            }
            // else: a prior-term entry reaching quorum by count alone is not
            // committed directly; it will be covered once a current-term
            // entry at a higher index reaches quorum.
        }
    }

    #[cfg(test)]
    pub(crate) fn on_append_entries_reply_for_test(&self, peer_id: PeerId, reply: AppendEntriesReply) {
        self.on_append_entries_reply(peer_id, reply, None);
    }
}
