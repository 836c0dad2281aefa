//! Command surface: requests, their arguments and the response envelope.
//!
//! A request is `{"command": <name>, "args": {...}}`. Missing `layerId`
//! arguments default to the active layer (or to the view of global plus
//! active layer when a key is looked up).

mod dispatcher;

pub use dispatcher::{ClosedTabs, ComboOutcome, CommandCombo, Dispatcher, StateSnapshot, Toggled};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorPayload, KeypinError, Result};
use crate::keys::{KeyCode, LayerId, PartialKeyRef};
use crate::pins::{FocusOptions, PinScope, UrlPattern};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoArgs {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayerArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer_id: Option<LayerId>,
}

impl LayerArgs {
    pub fn layer(layer_id: LayerId) -> Self {
        Self {
            layer_id: Some(layer_id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyRefArgs {
    #[serde(flatten)]
    pub key_ref: PartialKeyRef,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PinOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin_scope: Option<PinScope>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinTabArgs {
    #[serde(flatten)]
    pub key_ref: PartialKeyRef,
    pub options: PinOptions,
}

/// Changes applied by `updatePin`. A missing destination layer keeps the
/// layer the source pin lives in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PinUpdates {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer_id: Option<LayerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<KeyCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_pattern: Option<UrlPattern>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdatePinArgs {
    #[serde(flatten)]
    pub key_ref: PartialKeyRef,
    pub updates: PinUpdates,
    pub swap: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusTabArgs {
    #[serde(flatten)]
    pub key_ref: PartialKeyRef,
    pub options: FocusOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeighborArgs {
    pub offset: i32,
}

impl Default for NeighborArgs {
    fn default() -> Self {
        Self { offset: 1 }
    }
}

/// `toggleTabPinned` pins the active tab with these arguments, or unpins it
/// when already pinned in the given layer (or the current view).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToggleArgs {
    #[serde(flatten)]
    pub key_ref: PartialKeyRef,
    pub options: PinOptions,
}

/// Without explicit layers the current view is listed, one entry per key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListPinsArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer_ids: Option<Vec<LayerId>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetCommandComboArgs {
    pub command: String,
    pub combo: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SetKeyOrderArgs {
    pub input_chars: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecuteComboArgs {
    /// Typed characters.
    pub input: String,
    /// Physical key presses after `input`, modifiers included.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub key_codes: Vec<KeyCode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunShortcutArgs {
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "camelCase")]
pub enum Command {
    GetState(NoArgs),
    SetActiveLayerId(LayerArgs),
    ListCommandCombos(NoArgs),
    SetCommandCombo(SetCommandComboArgs),
    GetKeyOrder(NoArgs),
    SetKeyOrder(SetKeyOrderArgs),
    PinTab(PinTabArgs),
    UpdatePin(UpdatePinArgs),
    ClearLayer(LayerArgs),
    RemovePin(KeyRefArgs),
    FocusTab(FocusTabArgs),
    FocusNeighborTab(NeighborArgs),
    CloseTab(KeyRefArgs),
    CloseTabs(LayerArgs),
    CloseUnpinnedTabs(NoArgs),
    ToggleTabPinned(ToggleArgs),
    GetPin(KeyRefArgs),
    ListPins(ListPinsArgs),
    GetActiveKey(NoArgs),
    ExecuteCombo(ExecuteComboArgs),
    RunShortcut(RunShortcutArgs),
}

pub const COMMAND_NAMES: &[&str] = &[
    "getState",
    "setActiveLayerId",
    "listCommandCombos",
    "setCommandCombo",
    "getKeyOrder",
    "setKeyOrder",
    "pinTab",
    "updatePin",
    "clearLayer",
    "removePin",
    "focusTab",
    "focusNeighborTab",
    "closeTab",
    "closeTabs",
    "closeUnpinnedTabs",
    "toggleTabPinned",
    "getPin",
    "listPins",
    "getActiveKey",
    "executeCombo",
    "runShortcut",
];

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::GetState(_) => "getState",
            Command::SetActiveLayerId(_) => "setActiveLayerId",
            Command::ListCommandCombos(_) => "listCommandCombos",
            Command::SetCommandCombo(_) => "setCommandCombo",
            Command::GetKeyOrder(_) => "getKeyOrder",
            Command::SetKeyOrder(_) => "setKeyOrder",
            Command::PinTab(_) => "pinTab",
            Command::UpdatePin(_) => "updatePin",
            Command::ClearLayer(_) => "clearLayer",
            Command::RemovePin(_) => "removePin",
            Command::FocusTab(_) => "focusTab",
            Command::FocusNeighborTab(_) => "focusNeighborTab",
            Command::CloseTab(_) => "closeTab",
            Command::CloseTabs(_) => "closeTabs",
            Command::CloseUnpinnedTabs(_) => "closeUnpinnedTabs",
            Command::ToggleTabPinned(_) => "toggleTabPinned",
            Command::GetPin(_) => "getPin",
            Command::ListPins(_) => "listPins",
            Command::GetActiveKey(_) => "getActiveKey",
            Command::ExecuteCombo(_) => "executeCombo",
            Command::RunShortcut(_) => "runShortcut",
        }
    }

    /// Parses a request object. `args` may be omitted or null.
    pub fn from_request(mut request: Value) -> Result<Self> {
        let name = request
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| KeypinError::InvalidArgs("request has no command".to_string()))?
            .to_string();
        if !COMMAND_NAMES.contains(&name.as_str()) {
            return Err(KeypinError::UnknownCommand(name));
        }
        if let Some(fields) = request.as_object_mut() {
            if fields.get("args").map_or(true, Value::is_null) {
                fields.insert("args".to_string(), Value::Object(Default::default()));
            }
        }
        serde_json::from_value(request)
            .map_err(|e| KeypinError::InvalidArgs(format!("{}: {}", name, e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl Response {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(error: &KeypinError) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.payload()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_request_without_args() {
        let command = Command::from_request(json!({"command": "getState"})).unwrap();
        assert_eq!(command, Command::GetState(NoArgs {}));
        let command = Command::from_request(json!({"command": "closeUnpinnedTabs", "args": null}))
            .unwrap();
        assert_eq!(command.name(), "closeUnpinnedTabs");
    }

    #[test]
    fn test_parse_flattened_key_ref() {
        let command = Command::from_request(json!({
            "command": "focusTab",
            "args": {"key": "KeyA", "options": {"summon": true}},
        }))
        .unwrap();
        assert_eq!(
            command,
            Command::FocusTab(FocusTabArgs {
                key_ref: PartialKeyRef::key("KeyA"),
                options: FocusOptions {
                    summon: true,
                    ..FocusOptions::default()
                },
            })
        );
    }

    #[test]
    fn test_parse_update_pin() {
        let command = Command::from_request(json!({
            "command": "updatePin",
            "args": {"layerId": 1, "key": "KeyA", "updates": {"key": "KeyB"}, "swap": true},
        }))
        .unwrap();
        let Command::UpdatePin(args) = command else {
            panic!("expected updatePin");
        };
        assert_eq!(args.key_ref, PartialKeyRef::in_layer(LayerId::new(1).unwrap(), "KeyA"));
        assert_eq!(args.updates.key, Some(KeyCode::new("KeyB")));
        assert!(args.swap);
    }

    #[test]
    fn test_unknown_command() {
        let err = Command::from_request(json!({"command": "explode"})).unwrap_err();
        assert!(matches!(err, KeypinError::UnknownCommand(ref name) if name == "explode"));
        assert!(err.is_user_error());
    }

    #[test]
    fn test_bad_layer_is_invalid_args() {
        let err = Command::from_request(json!({
            "command": "setActiveLayerId",
            "args": {"layerId": 12},
        }))
        .unwrap_err();
        assert!(matches!(err, KeypinError::InvalidArgs(_)));
    }

    #[test]
    fn test_every_command_name_round_trips() {
        for name in COMMAND_NAMES {
            let command = Command::from_request(json!({"command": name})).unwrap();
            assert_eq!(command.name(), *name);
        }
    }

    #[test]
    fn test_response_shape() {
        let ok = serde_json::to_value(Response::ok(json!(3))).unwrap();
        assert_eq!(ok, json!({"success": true, "result": 3}));

        let err = serde_json::to_value(Response::err(&KeypinError::NoActiveTab)).unwrap();
        assert_eq!(
            err,
            json!({"success": false, "error": {"name": "UserError", "message": "No active tab."}})
        );
    }
}
