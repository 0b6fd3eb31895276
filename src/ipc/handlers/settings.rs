use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const THEME_KEY: &str = "shell.theme";

/// Shell configuration is explicit daemon state with defined defaults, not
/// ambient globals. The engine never reads it.
fn default_theme() -> serde_json::Value {
    json!({
        "primaryColor": "#61dafb",
        "accentColor": "#61dafb",
        "backgroundColor": "#282c34",
        "textColor": "#ffffff",
        "decorationSize": 100,
        "decorationSpacing": 20
    })
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "theme": default_theme() }));
    };

    let stored = match db::settings_get_json(conn, THEME_KEY) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut theme = default_theme();
    if let Some(serde_json::Value::Object(overrides)) = stored {
        if let Some(map) = theme.as_object_mut() {
            for (k, v) in overrides {
                map.insert(k, v);
            }
        }
    }

    ok(&req.id, json!({ "theme": theme }))
}

fn handle_settings_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let defaults = default_theme();
    for key in patch.keys() {
        if defaults.get(key).is_none() {
            return err(
                &req.id,
                "bad_params",
                format!("unknown theme key: {}", key),
                None,
            );
        }
    }

    let mut stored = match db::settings_get_json(conn, THEME_KEY) {
        Ok(Some(serde_json::Value::Object(m))) => m,
        Ok(_) => serde_json::Map::new(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    for (k, v) in patch {
        stored.insert(k.clone(), v.clone());
    }

    if let Err(e) = db::settings_set_json(conn, THEME_KEY, &serde_json::Value::Object(stored)) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_settings_reset(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Err(e) = db::settings_delete(conn, THEME_KEY) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "theme": default_theme() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.set" => Some(handle_settings_set(state, req)),
        "settings.reset" => Some(handle_settings_reset(state, req)),
        _ => None,
    }
}
