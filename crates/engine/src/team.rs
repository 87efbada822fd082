use std::collections::{BTreeMap, HashMap};

use volition_core::{AgentHandle, GoalHandle, Message, UniqueId};

use crate::engine::EngineCtx;
use crate::schedule::Schedule;

/// One belief message shared into a team by a member.
#[derive(Debug, Clone)]
pub struct SharedBelief {
    pub member: AgentHandle,
    pub message: Message,
    pub last_updated_us: u64,
}

/// A delegation auction in flight: the team has asked every capable
/// member to cost the goal, and folds the bids into the schedule when
/// everyone answered or the expiry passes.
#[derive(Debug, Clone)]
pub struct CurrentAuction {
    pub goal: GoalHandle,
    pub goal_index: usize,
    pub schedule_id: u64,
    pub total_delegations: usize,
    pub bids: Vec<(AgentHandle, f32)>,
    /// Engine-clock time point after which missing bids are timeouts.
    pub expiry_us: u64,
}

impl CurrentAuction {
    pub fn finished(&self, now_us: u64) -> bool {
        self.bids.len() >= self.total_delegations || now_us >= self.expiry_us
    }

    pub fn best_bid(&self) -> Option<(AgentHandle, f32)> {
        self.bids
            .iter()
            .filter(|(_, score)| score.is_finite())
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .cloned()
    }
}

/// The team-specific half of an agent: the member list, auction
/// bookkeeping and the shared-beliefset store.
#[derive(Default)]
pub struct TeamState {
    members: Vec<AgentHandle>,
    auctions: Vec<CurrentAuction>,
    shared_beliefs: BTreeMap<String, Vec<SharedBelief>>,
}

impl TeamState {
    pub fn members(&self) -> &[AgentHandle] {
        &self.members
    }

    pub fn has_member(&self, id: UniqueId) -> bool {
        self.members.iter().any(|m| m.id == id)
    }

    pub fn add_member(&mut self, member: AgentHandle) -> bool {
        if self.has_member(member.id) {
            tracing::warn!(member = %member, "Agent is already in the team");
            return false;
        }
        self.members.push(member);
        true
    }

    pub fn remove_member(&mut self, id: UniqueId) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.id != id);
        before != self.members.len()
    }

    /// Members able to take a goal: role supports it, and the member is
    /// available and running right now.
    pub fn delegates_for(
        &self,
        goal: &str,
        ctx: &EngineCtx,
        goal_support: &HashMap<String, Vec<String>>,
    ) -> Vec<AgentHandle> {
        let Some(supporting_roles) = goal_support.get(goal) else {
            return Vec::new();
        };
        self.members
            .iter()
            .filter_map(|member| {
                let info = ctx.agents.iter().find(|a| a.handle.id == member.id)?;
                let role_ok = info
                    .roles
                    .iter()
                    .any(|role| supporting_roles.contains(role));
                (role_ok && info.available && info.running).then(|| member.clone())
            })
            .collect()
    }

    pub fn open_auction(
        &mut self,
        goal: GoalHandle,
        goal_index: usize,
        schedule_id: u64,
        total_delegations: usize,
        expiry_us: u64,
    ) {
        self.auctions.push(CurrentAuction {
            goal,
            goal_index,
            schedule_id,
            total_delegations,
            bids: Vec::new(),
            expiry_us,
        });
    }

    /// Feed a returned bid into its auction. Bids referencing an older
    /// schedule are stale and dropped.
    pub fn record_bid(&mut self, goal: &GoalHandle, bidder: AgentHandle, score: f32, schedule_id: u64) {
        let Some(auction) = self
            .auctions
            .iter_mut()
            .find(|a| a.schedule_id == schedule_id && a.goal == *goal)
        else {
            tracing::debug!(goal = %goal, bidder = %bidder, schedule_id,
                "Stale auction bid, dropping");
            return;
        };
        tracing::debug!(goal = %goal, bidder = %bidder, score, "Auction bid received");
        auction.bids.push((bidder, score));
    }

    /// Complete every finished auction against the current schedule.
    /// Auctions from older schedules are discarded outright.
    pub fn reconcile_auctions(&mut self, now_us: u64, schedule: Option<&mut Schedule>) {
        let Some(schedule) = schedule else {
            self.auctions.clear();
            return;
        };
        let schedule_id = schedule.id();
        let mut remaining = Vec::new();
        for auction in self.auctions.drain(..) {
            if auction.schedule_id != schedule_id {
                tracing::debug!(goal = %auction.goal, auction.schedule_id,
                    "Discarding auction for an outdated schedule");
                continue;
            }
            if !auction.finished(now_us) {
                remaining.push(auction);
                continue;
            }
            let best = auction.best_bid();
            match &best {
                Some((winner, score)) => {
                    tracing::debug!(goal = %auction.goal, winner = %winner, score,
                        bids = auction.bids.len(), "Auction finished");
                }
                None => {
                    tracing::warn!(goal = %auction.goal,
                        "Auction expired without bids");
                }
            }
            schedule.complete_auction(auction.goal_index, best);
        }
        self.auctions = remaining;
    }

    pub fn store_shared_beliefs(&mut self, member: AgentHandle, message: Message, last_updated_us: u64) {
        let entries = self
            .shared_beliefs
            .entry(message.schema().to_string())
            .or_default();
        match entries.iter_mut().find(|e| e.member == member) {
            Some(entry) => {
                entry.message = message;
                entry.last_updated_us = last_updated_us;
            }
            None => entries.push(SharedBelief {
                member,
                message,
                last_updated_us,
            }),
        }
    }

    /// All copies of a shared beliefset, one per publishing member.
    pub fn shared_beliefs(&self, schema: &str) -> &[SharedBelief] {
        self.shared_beliefs
            .get(schema)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// The most recently updated copy of a shared beliefset.
    pub fn most_recent_shared_belief(&self, schema: &str) -> Option<&SharedBelief> {
        self.shared_beliefs(schema)
            .iter()
            .max_by_key(|e| e.last_updated_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(name: &str) -> AgentHandle {
        AgentHandle::new(name, UniqueId::random())
    }

    #[test]
    fn test_membership_is_deduplicated() {
        let mut team = TeamState::default();
        let alice = handle("alice");
        assert!(team.add_member(alice.clone()));
        assert!(!team.add_member(alice.clone()));
        assert_eq!(team.members().len(), 1);
        assert!(team.remove_member(alice.id));
        assert!(!team.remove_member(alice.id));
    }

    #[test]
    fn test_auction_finishes_on_bids_or_expiry() {
        let goal = GoalHandle::new("G", UniqueId::random());
        let mut auction = CurrentAuction {
            goal,
            goal_index: 0,
            schedule_id: 1,
            total_delegations: 2,
            bids: Vec::new(),
            expiry_us: 2_000_000,
        };
        assert!(!auction.finished(0));
        assert!(auction.finished(2_000_000));

        auction.bids.push((handle("a"), 5.0));
        auction.bids.push((handle("b"), 3.0));
        assert!(auction.finished(0));
        assert_eq!(auction.best_bid().unwrap().1, 3.0);
        assert_eq!(auction.best_bid().unwrap().0.name, "b");
    }

    #[test]
    fn test_infinite_bids_never_win() {
        let goal = GoalHandle::new("G", UniqueId::random());
        let auction = CurrentAuction {
            goal,
            goal_index: 0,
            schedule_id: 1,
            total_delegations: 1,
            bids: vec![(handle("a"), f32::INFINITY)],
            expiry_us: 0,
        };
        assert!(auction.best_bid().is_none());
    }

    #[test]
    fn test_stale_bids_dropped() {
        let mut team = TeamState::default();
        let goal = GoalHandle::new("G", UniqueId::random());
        team.open_auction(goal.clone(), 0, 5, 1, 2_000_000);
        team.record_bid(&goal, handle("a"), 1.0, 4); // old schedule
        assert!(team.auctions[0].bids.is_empty());
        team.record_bid(&goal, handle("a"), 1.0, 5);
        assert_eq!(team.auctions[0].bids.len(), 1);
    }

    #[test]
    fn test_shared_beliefs_replace_per_member() {
        let mut team = TeamState::default();
        let alice = handle("alice");
        let message = volition_core::MessageSchema::new("Pos")
            .with_field_value("x", 1i32)
            .instantiate()
            .unwrap();
        team.store_shared_beliefs(alice.clone(), message.clone(), 10);
        let mut newer = message.clone();
        newer.set_field("x", 2i32).unwrap();
        team.store_shared_beliefs(alice.clone(), newer, 20);

        let entries = team.shared_beliefs("Pos");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].last_updated_us, 20);
        assert_eq!(
            team.most_recent_shared_belief("Pos").unwrap().member,
            alice
        );
    }
}
