//! Triple: a statement node together with its subject, predicate and object.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::nodes::{EntityNode, StatementNode};

/// A persisted statement plus the three entities it connects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    pub statement: StatementNode,
    pub subject: EntityNode,
    pub predicate: EntityNode,
    pub object: EntityNode,
    /// Episode that produced this triple.
    pub episode_uuid: Uuid,
}

impl Triple {
    /// Subject, predicate and object, in that order.
    pub fn entities(&self) -> [&EntityNode; 3] {
        [&self.subject, &self.predicate, &self.object]
    }

    /// Replace any entity reference found in `resolved` with its winner.
    /// Returns `true` if anything changed.
    pub fn rewrite_entities(&mut self, resolved: &HashMap<Uuid, EntityNode>) -> bool {
        let mut changed = false;
        for slot in [&mut self.subject, &mut self.predicate, &mut self.object] {
            if let Some(winner) = resolved.get(&slot.uuid) {
                if winner.uuid != slot.uuid {
                    *slot = winner.clone();
                    changed = true;
                }
            }
        }
        changed
    }
}
