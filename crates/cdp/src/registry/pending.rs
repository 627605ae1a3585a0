//! Pending Command Registry
//!
//! id -> in-flight command. An id is present iff its command was submitted
//! and not yet resolved. Every exit goes through `take` or `drain_all`, and
//! whoever removes the command is the only one allowed to resolve it.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::command::Command;
use crate::error::{Result, SocketError};
use crate::protocol::CommandId;

#[derive(Debug, Default)]
pub struct PendingCommands {
    commands: DashMap<CommandId, Command>,
}

impl PendingCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a submitted command.
    ///
    /// A duplicate id means the id source was reused; the rejected command
    /// is failed immediately and the error returned to the submitter.
    pub fn put(&self, command: Command) -> Result<()> {
        match self.commands.entry(command.id()) {
            Entry::Occupied(existing) => {
                let id = *existing.key();
                drop(existing);
                tracing::error!("Command id {} is already pending", id);
                command.resolve(Err(SocketError::DuplicateId(id)));
                Err(SocketError::DuplicateId(id))
            }
            Entry::Vacant(slot) => {
                slot.insert(command);
                Ok(())
            }
        }
    }

    /// Remove a command so the caller can resolve it
    pub fn take(&self, id: CommandId) -> Option<Command> {
        self.commands.remove(&id).map(|(_, command)| command)
    }

    /// Remove every pending command. Teardown only.
    pub fn drain_all(&self) -> Vec<Command> {
        let ids: Vec<CommandId> = self.commands.iter().map(|entry| *entry.key()).collect();
        let mut drained: Vec<Command> = ids.into_iter().filter_map(|id| self.take(id)).collect();
        drained.sort_by_key(Command::id);
        drained
    }

    pub fn contains(&self, id: CommandId) -> bool {
        self.commands.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::IdSource;
    use serde_json::Value;

    #[test]
    fn test_put_and_take() {
        let ids = IdSource::new();
        let pending = PendingCommands::new();
        let (command, _completion) = Command::submit(&ids, "X.y", None, None);
        pending.put(command).unwrap();

        assert!(pending.contains(1));
        let command = pending.take(1).unwrap();
        assert_eq!(command.method(), "X.y");
        assert!(pending.take(1).is_none());
        assert!(pending.is_empty());
        command.resolve(Ok(Value::Null));
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let pending = PendingCommands::new();
        let first_ids = IdSource::new();
        let second_ids = IdSource::new();
        let (first, _first_completion) = Command::submit(&first_ids, "A.a", None, None);
        let (second, second_completion) = Command::submit(&second_ids, "B.b", None, None);

        pending.put(first).unwrap();
        match pending.put(second) {
            Err(SocketError::DuplicateId(1)) => {}
            other => panic!("Expected duplicate id error, got {:?}", other),
        }
        assert!(matches!(
            second_completion.wait().await,
            Err(SocketError::DuplicateId(1))
        ));
        assert_eq!(pending.take(1).unwrap().method(), "A.a");
    }

    #[tokio::test]
    async fn test_drain_all_empties_registry() {
        let ids = IdSource::new();
        let pending = PendingCommands::new();
        let mut completions = Vec::new();
        for method in ["A.a", "B.b", "C.c"] {
            let (command, completion) = Command::submit(&ids, method, None, None);
            pending.put(command).unwrap();
            completions.push(completion);
        }

        let drained = pending.drain_all();
        assert_eq!(
            drained.iter().map(Command::id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(pending.is_empty());
        assert!(pending.drain_all().is_empty());

        for command in drained {
            command.resolve(Err(SocketError::Closed));
        }
        for completion in completions {
            assert!(completion.wait().await.unwrap_err().is_closed());
        }
    }
}
