use serde::{Deserialize, Serialize};

/// A counted, bounded quantity owned by an agent's belief context.
///
/// Plans declare the resources they need; the executor locks them for the
/// lifetime of the plan and the scheduler uses the same lock list to
/// sequence conflicting intentions. `consume`/`produce` may push the count
/// out of `[min, max]` — that is the violated state the planner and
/// executor test for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    name: String,
    min: i64,
    max: i64,
    count: i64,
    locked: bool,
}

impl Resource {
    pub fn new(name: impl Into<String>, min: i64, max: i64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            count: max,
            locked: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn min(&self) -> i64 {
        self.min
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn set(&mut self, count: i64) {
        self.count = count;
    }

    pub fn consume(&mut self, amount: i64) {
        self.count = self.count.saturating_sub(amount);
    }

    pub fn produce(&mut self, amount: i64) {
        self.count = self.count.saturating_add(amount);
    }

    pub fn is_violated(&self) -> bool {
        self.count < self.min || self.count > self.max
    }

    /// A locked resource is unavailable to other plans in the same agent
    /// until unlocked.
    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_produce_violation() {
        let mut battery = Resource::new("Battery", 0, 100);
        assert_eq!(battery.count(), 100);
        battery.consume(40);
        assert_eq!(battery.count(), 60);
        assert!(!battery.is_violated());

        battery.consume(70);
        assert!(battery.is_violated());

        battery.produce(50);
        assert_eq!(battery.count(), 40);
        assert!(!battery.is_violated());
    }

    #[test]
    fn test_lock_unlock() {
        let mut exclusive = Resource::new("Exclusive", 0, 1);
        assert!(!exclusive.locked());
        exclusive.lock();
        assert!(exclusive.locked());
        exclusive.unlock();
        assert!(!exclusive.locked());
    }
}
