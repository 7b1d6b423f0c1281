use serde_json::json;
use std::path::PathBuf;

use crate::backup;
use crate::config;
use crate::db;
use crate::errors::ApiError;
use crate::ipc::error::respond;
use crate::ipc::helpers::{get_opt_str, get_str, require_db};
use crate::ipc::types::{AppState, Request};

fn workspace_path(state: &AppState, params: &serde_json::Value) -> Result<PathBuf, ApiError> {
    if let Some(raw) = get_opt_str(params, "workspacePath") {
        return Ok(PathBuf::from(raw));
    }
    state.workspace.clone().ok_or(ApiError::NoWorkspace)
}

fn handle_export(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    require_db(state)?;
    let workspace = workspace_path(state, &req.params)?;
    let out_path = PathBuf::from(get_str(&req.params, "outPath")?);

    let summary = backup::export_workspace_bundle(&workspace, &out_path)?;
    Ok(json!({
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "outPath": out_path.to_string_lossy(),
    }))
}

fn handle_import(state: &mut AppState, req: &Request) -> Result<serde_json::Value, ApiError> {
    let workspace = workspace_path(state, &req.params)?;
    let in_path = PathBuf::from(get_str(&req.params, "inPath")?);

    // The live connection would otherwise point at the replaced file.
    state.db = None;
    let summary = backup::import_workspace_bundle(&in_path, &workspace)?;
    let conn = db::open_db(&workspace)?;
    state.config = config::load(&conn);
    state.workspace = Some(workspace.clone());
    state.db = Some(conn);

    Ok(json!({
        "bundleFormatDetected": summary.bundle_format_detected,
        "workspacePath": workspace.to_string_lossy(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.exportWorkspaceBundle" => handle_export(state, req),
        "backup.importWorkspaceBundle" => handle_import(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
