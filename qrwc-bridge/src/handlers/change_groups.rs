//! Thin wrappers over the Change-Group Registry (component E) for the
//! eight change-group tools in spec §6.

use crate::bridge::Bridge;
use crate::params::{
    ChangeGroupControlsParams, ChangeGroupIdParams, CreateChangeGroupParams,
    SetChangeGroupAutoPollParams,
};
use qrwc_core::{BridgeError, BridgeResult};
use serde_json::{json, Value};

pub async fn create_change_group(bridge: &Bridge, params: CreateChangeGroupParams) -> BridgeResult<Value> {
    let group = bridge.registry.create(&params.id, params.poll_interval)?;
    Ok(json!({
        "id": group.id,
        "created": true,
        "pollInterval": group.poll_interval_ms,
    }))
}

pub async fn add_controls_to_change_group(bridge: &Bridge, params: ChangeGroupControlsParams) -> BridgeResult<Value> {
    if params.controls.is_empty() {
        return Err(BridgeError::Validation("controls must not be empty".into()));
    }
    let added = bridge.registry.add_controls(&params.id, &params.controls).await?;
    Ok(json!({ "controlsAdded": added }))
}

pub async fn remove_controls_from_change_group(bridge: &Bridge, params: ChangeGroupControlsParams) -> BridgeResult<Value> {
    let removed = bridge.registry.remove_controls(&params.id, &params.controls).await?;
    Ok(json!({ "removed": removed }))
}

pub async fn clear_change_group(bridge: &Bridge, params: ChangeGroupIdParams) -> BridgeResult<Value> {
    bridge.registry.clear(&params.id).await?;
    Ok(json!({ "ok": true }))
}

pub async fn poll_change_group(bridge: &Bridge, params: ChangeGroupIdParams) -> BridgeResult<Value> {
    let events = bridge.registry.poll(&params.id).await?;
    let changes: Vec<Value> = events
        .iter()
        .map(|e| {
            let (component, name) = super::split_component(&e.control_name);
            json!({
                "component": component,
                "name": name,
                "value": super::control_value_json(&e.value),
                "string": e.string_repr,
                "timestamp": e.timestamp_ms,
            })
        })
        .collect();
    Ok(json!({ "changes": changes }))
}

pub async fn set_change_group_auto_poll(bridge: &Bridge, params: SetChangeGroupAutoPollParams) -> BridgeResult<Value> {
    bridge.registry.set_auto_poll(&params.id, params.enabled, params.interval).await?;
    Ok(json!({ "ok": true }))
}

pub async fn list_change_groups(bridge: &Bridge) -> BridgeResult<Value> {
    let groups = bridge.registry.list().await;
    let items: Vec<Value> = groups
        .iter()
        .map(|g| {
            json!({
                "id": g.id,
                "controlCount": g.control_count,
                "autoPoll": g.auto_poll,
                "pollInterval": g.poll_interval_ms,
                "created": g.created_at_ms,
            })
        })
        .collect();
    Ok(json!({ "groups": items }))
}

pub async fn destroy_change_group(bridge: &Bridge, params: ChangeGroupIdParams) -> BridgeResult<Value> {
    bridge.registry.destroy(&params.id).await?;
    Ok(json!({ "ok": true }))
}
