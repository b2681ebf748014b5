//! `query_core_status` -- a thin read over `StatusGet`, reshaped to the
//! subset spec §6 asks for (`includeDesignInfo`, `includeNetworkInfo`).

use crate::bridge::Bridge;
use crate::params::QueryCoreStatusParams;
use qrwc_core::{BridgeResult, QrwcMethod};
use serde_json::{json, Value};

pub async fn query_core_status(bridge: &Bridge, params: QueryCoreStatusParams) -> BridgeResult<Value> {
    let raw = bridge.adapter.send_command(QrwcMethod::StatusGet, None).await?;
    let core_status = raw.get("Status").cloned().unwrap_or(Value::Null);

    let mut status = json!({
        "code": core_status.get("Code").cloned().unwrap_or(Value::Null),
        "string": core_status.get("String").cloned().unwrap_or(Value::Null),
        "platform": raw.get("Platform").cloned().unwrap_or(Value::Null),
        "version": raw.get("Version").cloned().unwrap_or(Value::Null),
        "isRedundant": raw.get("IsRedundant").cloned().unwrap_or(Value::Null),
        "isEmulator": raw.get("IsEmulator").cloned().unwrap_or(Value::Null),
    });

    if params.include_design_info.unwrap_or(false) {
        status["designName"] = raw.get("DesignName").cloned().unwrap_or(Value::Null);
        status["designCode"] = raw.get("DesignCode").cloned().unwrap_or(Value::Null);
    }
    if params.include_network_info.unwrap_or(false) {
        status["networkInfo"] = raw.get("NetworkInfo").cloned().unwrap_or(Value::Null);
    }

    Ok(json!({ "status": status }))
}
