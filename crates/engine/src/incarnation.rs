use redolink_common::Scn;
use redolink_redo::RedoHeader;
use serde::{Deserialize, Serialize};
use tracing::info;

/// One branch of the redo stream, created by a resetlogs event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Incarnation {
    pub id: u32,
    pub resetlogs_scn: Scn,
    pub prior_resetlogs_scn: Scn,
    pub status: String,
    pub resetlogs_id: u32,
    pub prior_incarnation: u32,
}

/// Known incarnations plus the one currently being read.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IncarnationSet {
    incarnations: Vec<Incarnation>,
    current_id: Option<u32>,
}

impl IncarnationSet {
    pub fn add(&mut self, incarnation: Incarnation) {
        if self
            .incarnations
            .iter()
            .any(|i| i.resetlogs_id == incarnation.resetlogs_id)
        {
            return;
        }
        self.incarnations.push(incarnation);
    }

    pub fn current(&self) -> Option<&Incarnation> {
        let id = self.current_id?;
        self.incarnations.iter().find(|i| i.id == id)
    }

    pub fn set_current(&mut self, id: u32) {
        self.current_id = Some(id);
    }

    pub fn by_resetlogs_id(&self, resetlogs_id: u32) -> Option<&Incarnation> {
        self.incarnations.iter().find(|i| i.resetlogs_id == resetlogs_id)
    }

    pub fn len(&self) -> usize {
        self.incarnations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.incarnations.is_empty()
    }

    /// A redo header carrying an unknown `resetlogs_id` whose fork point
    /// equals the SCN we were about to read means the stream forked under
    /// us: switch incarnations. The caller resets the sequence to 1, clears
    /// the activation and forces a schema checkpoint.
    pub fn detect_switch(&mut self, header: &RedoHeader, expected_next_scn: Scn) -> bool {
        if Some(header.resetlogs_id) == self.current().map(|i| i.resetlogs_id) {
            return false;
        }
        if self.current().is_none() {
            return false;
        }
        if header.resetlogs_scn != expected_next_scn {
            return false;
        }
        let prior = self.current().cloned();
        let id = self.incarnations.iter().map(|i| i.id).max().unwrap_or(0) + 1;
        let incarnation = Incarnation {
            id,
            resetlogs_scn: header.resetlogs_scn,
            prior_resetlogs_scn: prior.as_ref().map(|p| p.resetlogs_scn).unwrap_or(Scn::ZERO),
            status: "CURRENT".to_string(),
            resetlogs_id: header.resetlogs_id,
            prior_incarnation: prior.map(|p| p.id).unwrap_or(0),
        };
        info!(
            id = incarnation.id,
            resetlogs_id = incarnation.resetlogs_id,
            resetlogs_scn = %incarnation.resetlogs_scn,
            "database incarnation switch"
        );
        self.add(incarnation);
        self.current_id = Some(id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redolink_common::{Seq, Time};

    fn header(resetlogs_id: u32, resetlogs_scn: u64) -> RedoHeader {
        RedoHeader {
            database_id: 1,
            resetlogs_id,
            activation: 7,
            thread: 1,
            sequence: Seq(1),
            first_scn: Scn(resetlogs_scn),
            first_time: Time(0),
            next_scn: Scn::NONE,
            next_time: Time(0),
            resetlogs_scn: Scn(resetlogs_scn),
        }
    }

    fn base_set() -> IncarnationSet {
        let mut set = IncarnationSet::default();
        set.add(Incarnation {
            id: 1,
            resetlogs_scn: Scn(1),
            prior_resetlogs_scn: Scn::ZERO,
            status: "CURRENT".into(),
            resetlogs_id: 100,
            prior_incarnation: 0,
        });
        set.set_current(1);
        set
    }

    #[test]
    fn test_same_resetlogs_no_switch() {
        let mut set = base_set();
        assert!(!set.detect_switch(&header(100, 1), Scn(5000)));
        assert_eq!(set.current().unwrap().id, 1);
    }

    #[test]
    fn test_switch_on_matching_fork_point() {
        let mut set = base_set();
        assert!(set.detect_switch(&header(200, 5000), Scn(5000)));
        let current = set.current().unwrap();
        assert_eq!(current.id, 2);
        assert_eq!(current.resetlogs_id, 200);
        assert_eq!(current.prior_incarnation, 1);
        assert_eq!(current.prior_resetlogs_scn, Scn(1));
    }

    #[test]
    fn test_no_switch_when_fork_point_differs() {
        let mut set = base_set();
        assert!(!set.detect_switch(&header(200, 4000), Scn(5000)));
        assert_eq!(set.current().unwrap().id, 1);
    }

    #[test]
    fn test_duplicate_add_ignored() {
        let mut set = base_set();
        set.add(Incarnation {
            id: 9,
            resetlogs_scn: Scn(1),
            prior_resetlogs_scn: Scn::ZERO,
            status: "ORPHAN".into(),
            resetlogs_id: 100,
            prior_incarnation: 0,
        });
        assert_eq!(set.len(), 1);
    }
}
