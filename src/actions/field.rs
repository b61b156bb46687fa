//! Create, delete and update field actions.

use crate::actions::{
    table_scope, ActionHistory, ActionId, ActionParams, ActionRecord, CreateFieldParams, DeleteFieldParams,
    UpdateFieldParams,
};
use crate::backup::{BackupDescriptor, FieldDataBackupHandler};
use crate::catalog::{database_table_name, extract_allowed, Field, FieldType, TableId, TrashKind, NAME_ATTRIBUTE};
use crate::error::AppError;
use crate::handler::FieldHandler;
use serde_json::{Map, Value};

pub struct CreateFieldActionType;

impl CreateFieldActionType {
    pub const TYPE: &'static str = "create_field";

    pub async fn run(
        history: &mut ActionHistory,
        handler: &mut dyn FieldHandler,
        table_id: TableId,
        type_name: &str,
        attrs: &Map<String, Value>,
    ) -> Result<Field, AppError> {
        let field = handler.create_field(table_id, type_name, attrs).await?;
        let id = history.reserve_id();
        let params = ActionParams::CreateField(CreateFieldParams { field_id: field.id });
        history
            .register(handler, ActionRecord::new(id, table_scope(table_id), params))
            .await?;
        tracing::info!(action_id = id, field_id = field.id, "field created");
        Ok(field)
    }

    pub(crate) async fn undo(handler: &mut dyn FieldHandler, params: &CreateFieldParams) -> Result<(), AppError> {
        let field = handler.get_field(params.field_id).await?;
        handler.delete_field(&field).await?;
        Ok(())
    }

    pub(crate) async fn redo(handler: &mut dyn FieldHandler, params: &CreateFieldParams) -> Result<(), AppError> {
        handler.trash().restore(TrashKind::Field, params.field_id).await
    }
}

pub struct DeleteFieldActionType;

impl DeleteFieldActionType {
    pub const TYPE: &'static str = "delete_field";

    /// Trashes `field`; returns fields updated as a consequence.
    pub async fn run(
        history: &mut ActionHistory,
        handler: &mut dyn FieldHandler,
        field: &Field,
    ) -> Result<Vec<Field>, AppError> {
        let updated = handler.delete_field(field).await?;
        let id = history.reserve_id();
        let params = ActionParams::DeleteField(DeleteFieldParams { field_id: field.id });
        history
            .register(handler, ActionRecord::new(id, table_scope(field.table_id), params))
            .await?;
        tracing::info!(action_id = id, field_id = field.id, "field deleted");
        Ok(updated)
    }

    pub(crate) async fn undo(handler: &mut dyn FieldHandler, params: &DeleteFieldParams) -> Result<(), AppError> {
        handler.trash().restore(TrashKind::Field, params.field_id).await
    }

    pub(crate) async fn redo(handler: &mut dyn FieldHandler, params: &DeleteFieldParams) -> Result<(), AppError> {
        let field = handler.get_field(params.field_id).await?;
        handler.delete_field(&field).await?;
        Ok(())
    }
}

pub struct UpdateFieldActionType;

impl UpdateFieldActionType {
    pub const TYPE: &'static str = "update_field";
    pub const UNDO_NAME_POSTFIX: &'static str = "(From undo)";
    pub const REDO_NAME_POSTFIX: &'static str = "(From redo)";

    /// Updates type and/or attributes of `field`, backing up its data first when the
    /// change can lose it. Returns the updated field and the dependants that changed.
    pub async fn run(
        history: &mut ActionHistory,
        handler: &mut dyn FieldHandler,
        field: &Field,
        new_type_name: Option<&str>,
        attrs: &Map<String, Value>,
    ) -> Result<(Field, Vec<Field>), AppError> {
        let registry = handler.field_types().clone();
        let from_type = registry.get_for(field)?;
        let to_type_name = new_type_name.unwrap_or(from_type.type_name()).to_string();
        let to_type = registry.get(&to_type_name)?;
        let allowed = extract_allowed(to_type.as_ref(), attrs);
        let previous_field_params = prepared_attrs(from_type.as_ref(), field, &allowed, &to_type_name);

        let action_id = history.reserve_id();
        let engine = FieldDataBackupHandler::new(&registry);
        let backup =
            backup_if_required(&engine, handler, from_type.as_ref(), field, &to_type_name, &allowed, action_id, false)
                .await?;

        let (updated, dependants) =
            match apply_update(&engine, handler, field, &to_type_name, &allowed, None, None).await {
                Ok(result) => result,
                Err(e) => {
                    discard_after_failure(&engine, handler, backup.as_ref()).await;
                    return Err(e);
                }
            };

        let params = ActionParams::UpdateField(UpdateFieldParams {
            field_id: updated.id,
            database_table_name: database_table_name(updated.table_id),
            previous_field_type: from_type.type_name().to_string(),
            previous_field_params,
            backup_data: backup,
        });
        history
            .register(handler, ActionRecord::new(action_id, table_scope(field.table_id), params))
            .await?;
        tracing::info!(
            action_id,
            field_id = updated.id,
            from = from_type.type_name(),
            to = %to_type_name,
            "field updated"
        );
        Ok((updated, dependants))
    }

    /// Applies the captured previous state and overwrites `params` with the state to come back to.
    pub(crate) async fn reverse(
        handler: &mut dyn FieldHandler,
        action_id: ActionId,
        params: &mut UpdateFieldParams,
        for_undo: bool,
    ) -> Result<(), AppError> {
        let registry = handler.field_types().clone();
        let new_attrs = params.previous_field_params.clone();
        let to_type_name = params.previous_field_type.clone();

        let field = handler.get_field(params.field_id).await?;
        let from_type = registry.get_for(&field)?;
        let previous_field_params = prepared_attrs(from_type.as_ref(), &field, &new_attrs, &to_type_name);

        let engine = FieldDataBackupHandler::new(&registry);
        let backup = backup_if_required(
            &engine,
            handler,
            from_type.as_ref(),
            &field,
            &to_type_name,
            &new_attrs,
            action_id,
            for_undo,
        )
        .await?;

        let postfix = if for_undo {
            Self::UNDO_NAME_POSTFIX
        } else {
            Self::REDO_NAME_POSTFIX
        };
        let result = apply_update(
            &engine,
            handler,
            &field,
            &to_type_name,
            &new_attrs,
            Some(postfix),
            params.backup_data.clone(),
        )
        .await;
        if let Err(e) = result {
            discard_after_failure(&engine, handler, backup.as_ref()).await;
            return Err(e);
        }

        params.backup_data = backup;
        params.previous_field_type = from_type.type_name().to_string();
        params.previous_field_params = previous_field_params;
        Ok(())
    }
}

/// Column or table name unique to this action, field and direction.
pub fn backup_identifier(action_id: ActionId, field_id: i64, for_undo: bool) -> String {
    let base = format!("field_{}_backup_{}", field_id, action_id);
    if for_undo {
        format!("{}_undo", base)
    } else {
        base
    }
}

/// Whether moving `original` to `to_type_name` with `changed` attributes can lose cell data.
pub fn should_backup_field(
    from_type: &dyn FieldType,
    original: &Field,
    to_type_name: &str,
    changed: &Map<String, Value>,
) -> bool {
    if from_type.data_is_derived_from_attrs() {
        return false;
    }
    let type_changed = to_type_name != from_type.type_name();
    let only_name_changed = changed.len() == 1 && changed.contains_key(NAME_ATTRIBUTE);
    type_changed || (!only_name_changed && from_type.requires_backup_for_same_type_update(original, changed))
}

/// Original attributes worth restoring later. Same type: only those being changed.
/// Type change: all of them, except `name` unless it is being changed too.
pub fn prepared_attrs(
    from_type: &dyn FieldType,
    field: &Field,
    changing: &Map<String, Value>,
    to_type_name: &str,
) -> Map<String, Value> {
    let mut exported = from_type.export_attributes(field);
    if to_type_name == from_type.type_name() {
        let untouched: Vec<String> = exported
            .keys()
            .filter(|k| !changing.contains_key(k.as_str()))
            .cloned()
            .collect();
        for key in untouched {
            exported.remove(&key);
        }
    } else if !changing.contains_key(NAME_ATTRIBUTE) {
        exported.remove(NAME_ATTRIBUTE);
    }
    exported
}

#[allow(clippy::too_many_arguments)]
async fn backup_if_required(
    engine: &FieldDataBackupHandler,
    handler: &mut dyn FieldHandler,
    from_type: &dyn FieldType,
    field: &Field,
    to_type_name: &str,
    changed: &Map<String, Value>,
    action_id: ActionId,
    for_undo: bool,
) -> Result<Option<BackupDescriptor>, AppError> {
    if !should_backup_field(from_type, field, to_type_name, changed) {
        return Ok(None);
    }
    let identifier = backup_identifier(action_id, field.id, for_undo);
    engine
        .backup_field_data(handler.schema(), field, &identifier)
        .await
        .map(Some)
}

/// Schema change, then the restore (so dependants see the right cells), then dependants.
async fn apply_update(
    engine: &FieldDataBackupHandler,
    handler: &mut dyn FieldHandler,
    field: &Field,
    type_name: &str,
    attrs: &Map<String, Value>,
    collision_postfix: Option<&str>,
    restore: Option<BackupDescriptor>,
) -> Result<(Field, Vec<Field>), AppError> {
    let change = handler
        .update_field_schema(field, type_name, attrs, collision_postfix)
        .await?;
    if let Some(backup) = restore {
        engine
            .restore_backup_data_into_field(handler.schema(), &change.field, backup)
            .await?;
    }
    let dependants = handler.update_dependants(&change).await?;
    Ok((change.field, dependants))
}

async fn discard_after_failure(
    engine: &FieldDataBackupHandler,
    handler: &mut dyn FieldHandler,
    backup: Option<&BackupDescriptor>,
) {
    let Some(backup) = backup else {
        return;
    };
    if let Err(e) = engine.clean_up_backup_data(handler.schema(), backup).await {
        tracing::warn!(error = %e, "could not discard backup of failed field update");
    }
}
