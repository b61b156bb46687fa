//! Reversible field actions and the per-scope undo/redo history.

pub mod field;

use crate::backup::{BackupDescriptor, FieldDataBackupHandler};
use crate::catalog::{FieldId, TableId};
use crate::error::AppError;
use crate::handler::FieldHandler;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use field::{CreateFieldActionType, DeleteFieldActionType, UpdateFieldActionType};

pub type ActionId = i64;

/// Scope shared by every action on one table's fields.
pub fn table_scope(table_id: TableId) -> String {
    format!("table{}", table_id)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Done,
    Undone,
    Redone,
}

impl ActionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionState::Done => "done",
            ActionState::Undone => "undone",
            ActionState::Redone => "redone",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "done" => Some(ActionState::Done),
            "undone" => Some(ActionState::Undone),
            "redone" => Some(ActionState::Redone),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateFieldParams {
    pub field_id: FieldId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeleteFieldParams {
    pub field_id: FieldId,
}

/// State needed to reverse the field's current state; swapped on every undo/redo.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateFieldParams {
    pub field_id: FieldId,
    /// Kept so the physical table is known even after the field is permanently deleted.
    pub database_table_name: String,
    pub previous_field_type: String,
    pub previous_field_params: Map<String, Value>,
    pub backup_data: Option<BackupDescriptor>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum ActionParams {
    CreateField(CreateFieldParams),
    DeleteField(DeleteFieldParams),
    UpdateField(UpdateFieldParams),
}

impl ActionParams {
    pub fn type_name(&self) -> &'static str {
        match self {
            ActionParams::CreateField(_) => CreateFieldActionType::TYPE,
            ActionParams::DeleteField(_) => DeleteFieldActionType::TYPE,
            ActionParams::UpdateField(_) => UpdateFieldActionType::TYPE,
        }
    }

    pub fn backup_data(&self) -> Option<&BackupDescriptor> {
        match self {
            ActionParams::UpdateField(p) => p.backup_data.as_ref(),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: ActionId,
    pub scope: String,
    pub state: ActionState,
    pub params: ActionParams,
    pub created_at: DateTime<Utc>,
}

impl ActionRecord {
    pub fn new(id: ActionId, scope: String, params: ActionParams) -> Self {
        ActionRecord {
            id,
            scope,
            state: ActionState::Done,
            params,
            created_at: Utc::now(),
        }
    }
}

/// Reclaims whatever extra storage an action still holds.
async fn clean_up_action_data(handler: &mut dyn FieldHandler, record: &ActionRecord) -> Result<(), AppError> {
    if let Some(backup) = record.params.backup_data() {
        let engine = FieldDataBackupHandler::new(handler.field_types());
        engine.clean_up_backup_data(handler.schema(), backup).await?;
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Undo,
    Redo,
}

/// Ordered action log. Within a scope, undone actions always trail the done/redone ones.
#[derive(Clone, Debug)]
pub struct ActionHistory {
    records: Vec<ActionRecord>,
    next_id: ActionId,
    max_per_scope: usize,
}

impl ActionHistory {
    pub fn new(max_per_scope: usize) -> Self {
        ActionHistory {
            records: Vec::new(),
            next_id: 1,
            max_per_scope: max_per_scope.max(1),
        }
    }

    /// Rebuilds a history from persisted records (any order).
    pub fn from_records(mut records: Vec<ActionRecord>, max_per_scope: usize) -> Self {
        records.sort_by_key(|r| r.id);
        let next_id = records.last().map(|r| r.id + 1).unwrap_or(1);
        ActionHistory {
            records,
            next_id,
            max_per_scope: max_per_scope.max(1),
        }
    }

    pub fn records(&self) -> &[ActionRecord] {
        &self.records
    }

    pub fn scope_records<'a>(&'a self, scope: &'a str) -> impl Iterator<Item = &'a ActionRecord> + 'a {
        self.records.iter().filter(move |r| r.scope == scope)
    }

    pub fn get(&self, id: ActionId) -> Option<&ActionRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Id for an action about to run; its backups are named after it.
    pub fn reserve_id(&mut self) -> ActionId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Appends `record`. Undone actions of the same scope can no longer be redone and are
    /// discarded, as are the oldest ones past the per-scope limit. Returns the discarded records.
    pub async fn register(
        &mut self,
        handler: &mut dyn FieldHandler,
        record: ActionRecord,
    ) -> Result<Vec<ActionRecord>, AppError> {
        let scope = record.scope.clone();
        if record.id >= self.next_id {
            self.next_id = record.id + 1;
        }
        let (mut pruned, kept): (Vec<ActionRecord>, Vec<ActionRecord>) = std::mem::take(&mut self.records)
            .into_iter()
            .partition(|r| r.scope == scope && r.state == ActionState::Undone);
        self.records = kept;
        self.records.push(record);

        let in_scope = self.records.iter().filter(|r| r.scope == scope).count();
        if in_scope > self.max_per_scope {
            let mut overflow = in_scope - self.max_per_scope;
            let (old, kept): (Vec<ActionRecord>, Vec<ActionRecord>) =
                std::mem::take(&mut self.records).into_iter().partition(|r| {
                    if overflow > 0 && r.scope == scope {
                        overflow -= 1;
                        true
                    } else {
                        false
                    }
                });
            self.records = kept;
            pruned.extend(old);
        }

        for record in &pruned {
            tracing::debug!(action_id = record.id, action_type = record.params.type_name(), "discarding action");
            clean_up_action_data(handler, record).await?;
        }
        Ok(pruned)
    }

    /// Reverses the latest done/redone action of `scope`. `None` when there is nothing to undo.
    pub async fn undo(
        &mut self,
        handler: &mut dyn FieldHandler,
        scope: &str,
    ) -> Result<Option<ActionRecord>, AppError> {
        let Some(index) = self
            .records
            .iter()
            .rposition(|r| r.scope == scope && r.state != ActionState::Undone)
        else {
            return Ok(None);
        };
        self.apply(handler, index, Direction::Undo).await.map(Some)
    }

    /// Re-applies the earliest undone action of `scope`, i.e. the one undone last.
    pub async fn redo(
        &mut self,
        handler: &mut dyn FieldHandler,
        scope: &str,
    ) -> Result<Option<ActionRecord>, AppError> {
        let Some(index) = self
            .records
            .iter()
            .position(|r| r.scope == scope && r.state == ActionState::Undone)
        else {
            return Ok(None);
        };
        self.apply(handler, index, Direction::Redo).await.map(Some)
    }

    async fn apply(
        &mut self,
        handler: &mut dyn FieldHandler,
        index: usize,
        direction: Direction,
    ) -> Result<ActionRecord, AppError> {
        let record = &self.records[index];
        let action_id = record.id;
        let params = match (&record.params, direction) {
            (ActionParams::CreateField(p), Direction::Undo) => {
                CreateFieldActionType::undo(handler, p).await?;
                record.params.clone()
            }
            (ActionParams::CreateField(p), Direction::Redo) => {
                CreateFieldActionType::redo(handler, p).await?;
                record.params.clone()
            }
            (ActionParams::DeleteField(p), Direction::Undo) => {
                DeleteFieldActionType::undo(handler, p).await?;
                record.params.clone()
            }
            (ActionParams::DeleteField(p), Direction::Redo) => {
                DeleteFieldActionType::redo(handler, p).await?;
                record.params.clone()
            }
            (ActionParams::UpdateField(p), direction) => {
                let mut p = p.clone();
                UpdateFieldActionType::reverse(handler, action_id, &mut p, direction == Direction::Undo).await?;
                ActionParams::UpdateField(p)
            }
        };

        let record = &mut self.records[index];
        record.params = params;
        record.state = match direction {
            Direction::Undo => ActionState::Undone,
            Direction::Redo => ActionState::Redone,
        };
        tracing::info!(
            action_id = record.id,
            action_type = record.params.type_name(),
            state = record.state.as_str(),
            "action reversed"
        );
        Ok(record.clone())
    }

    /// Drops every action of `scope`, reclaiming their backups.
    pub async fn discard_scope(&mut self, handler: &mut dyn FieldHandler, scope: &str) -> Result<usize, AppError> {
        let (dropped, kept): (Vec<ActionRecord>, Vec<ActionRecord>) =
            std::mem::take(&mut self.records).into_iter().partition(|r| r.scope == scope);
        self.records = kept;
        for record in &dropped {
            clean_up_action_data(handler, record).await?;
        }
        Ok(dropped.len())
    }
}
