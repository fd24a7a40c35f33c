//! Input windows and the suspend point behind `UI(...)`.
//!
//! In silent mode a window resolves immediately from the values already in `ctx.vars`.
//! Otherwise the run hands a [`Suspension`] to whoever drives it and blocks until the
//! response arrives on the enclosed one-shot channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use strum_macros::{EnumString, IntoStaticStr};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::context::Context;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum FieldType {
    #[default]
    Text,
    Number,
    SelectOne,
    SelectMany,
    Checkbox,
    Textarea,
}

impl FieldType {
    pub const ALL: [FieldType; 6] = [
        FieldType::Text,
        FieldType::Number,
        FieldType::SelectOne,
        FieldType::SelectMany,
        FieldType::Checkbox,
        FieldType::Textarea,
    ];

    #[inline]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One input of a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: FieldType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    /// The value shown in the form; the user's last input once known.
    #[serde(rename = "value")]
    pub default: Json,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    /// A visibility condition evaluated by the form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vif: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, label: impl Into<String>, kind: FieldType) -> Self {
        Field {
            name: name.into(),
            label: label.into(),
            kind,
            placeholder: None,
            default: Json::Null,
            options: None,
            vif: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Window {
    pub title: String,
    pub caption: Option<String>,
    pub fields: Vec<Field>,
}

/// A run waiting at a window.
#[derive(Debug)]
pub struct Suspension {
    pub window: Window,
    /// The sheet rendered so far.
    pub html: String,
    /// Receives the user's values, shaped `{title: {field: value}}`.
    pub respond: oneshot::Sender<Json>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InteractionError {
    #[error("no interaction channel is connected to this run")]
    NotConnected,
    #[error("the run was cancelled while waiting for input")]
    Cancelled,
}

/// The link between a context and the driver of its run.
#[derive(Debug, Default)]
pub struct InteractionState {
    suspensions: Option<mpsc::UnboundedSender<Suspension>>,
    cancel: Arc<AtomicBool>,
}

impl InteractionState {
    pub fn connected(suspensions: mpsc::UnboundedSender<Suspension>, cancel: Arc<AtomicBool>) -> Self {
        InteractionState {
            suspensions: Some(suspensions),
            cancel,
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Sends `window` to the driver and blocks until it answers.
    ///
    /// Must not be called from within an async runtime worker.
    pub fn request(&self, window: Window, html: String) -> Result<Json, InteractionError> {
        let sender = self
            .suspensions
            .as_ref()
            .ok_or(InteractionError::NotConnected)?;
        if self.is_cancelled() {
            return Err(InteractionError::Cancelled);
        }
        let (respond, response) = oneshot::channel();
        sender
            .send(Suspension {
                window,
                html,
                respond,
            })
            .map_err(|_| InteractionError::Cancelled)?;
        let values = response
            .blocking_recv()
            .map_err(|_| InteractionError::Cancelled)?;
        if self.is_cancelled() {
            return Err(InteractionError::Cancelled);
        }
        Ok(values)
    }
}

/// Merges `source` into `target`, descending into nested objects.
pub fn deep_update(target: &mut Map<String, Json>, source: &Map<String, Json>) {
    for (key, value) in source {
        match (target.get_mut(key), value) {
            (Some(Json::Object(existing)), Json::Object(update)) => deep_update(existing, update),
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

fn stored_input<'a>(vars: &'a Map<String, Json>, title: &str, field: &Field) -> Option<&'a Json> {
    vars.get(title)?.as_object()?.get(&field.name)
}

/// Shows `window` and returns the values of its fields.
///
/// Field defaults are replaced by the values already stored for the window. In silent
/// mode those values are returned at once and the window is kept in `ctx.ui_windows`.
/// Otherwise the run suspends until the driver answers; the answer is merged into
/// `ctx.vars` and fields it leaves out keep their defaults.
pub fn request_inputs(
    ctx: &mut Context,
    window: &mut Window,
) -> Result<Map<String, Json>, InteractionError> {
    for field in &mut window.fields {
        if let Some(stored) = stored_input(&ctx.vars, &window.title, field) {
            field.default = stored.clone();
        }
    }

    if ctx.is_silent() {
        ctx.ui_windows.push(window.clone());
        return Ok(window
            .fields
            .iter()
            .map(|field| (field.name.clone(), field.default.clone()))
            .collect());
    }

    debug!(title = %window.title, "waiting for input");
    let response = ctx
        .interaction
        .request(window.clone(), ctx.html_content())?;
    if let Json::Object(values) = &response {
        deep_update(&mut ctx.vars, values);
    }
    let entry = ctx
        .vars
        .entry(window.title.clone())
        .or_insert_with(|| Json::Object(Map::new()));
    if !entry.is_object() {
        *entry = Json::Object(Map::new());
    }
    let Json::Object(values) = entry else {
        return Ok(Map::new());
    };
    for field in &window.fields {
        values
            .entry(field.name.clone())
            .or_insert_with(|| field.default.clone());
    }
    Ok(values.clone())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn window() -> Window {
        let mut width = Field::new("b", "Width", FieldType::Number);
        width.default = json!(300);
        let mut grade = Field::new("grade", "Grade", FieldType::SelectOne);
        grade.default = json!("C30");
        grade.options = Some(vec!["C30".into(), "C40".into()]);
        Window {
            title: "Beam".to_string(),
            caption: None,
            fields: vec![width, grade],
        }
    }

    #[test]
    fn field_serialization() {
        let json = serde_json::to_value(&window().fields[1]).unwrap();
        assert_eq!(
            json,
            json!({"name": "grade", "label": "Grade", "type": "selectOne", "value": "C30", "options": ["C30", "C40"]})
        );
        assert_eq!("selectMany".parse::<FieldType>().unwrap(), FieldType::SelectMany);
    }

    #[test]
    fn deep_update_merges_nested_objects() {
        let mut target = json!({"Beam": {"b": 300, "h": 500}, "other": 1});
        let source = json!({"Beam": {"b": 250}, "new": {"x": 1}});
        deep_update(
            target.as_object_mut().unwrap(),
            source.as_object().unwrap(),
        );
        assert_eq!(
            target,
            json!({"Beam": {"b": 250, "h": 500}, "other": 1, "new": {"x": 1}})
        );
    }

    #[test]
    fn silent_mode_uses_stored_values() {
        let mut ctx = Context::for_tests();
        ctx.vars = json!({"Beam": {"b": 250}}).as_object().unwrap().clone();
        let mut window = window();
        let values = request_inputs(&mut ctx, &mut window).unwrap();
        assert_eq!(Json::Object(values), json!({"b": 250, "grade": "C30"}));
        assert_eq!(window.fields[0].default, json!(250));
        assert_eq!(ctx.ui_windows.len(), 1);
    }

    #[test]
    fn interactive_mode_waits_for_the_driver() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let driver = std::thread::spawn(move || {
            let suspension: Suspension = rx.blocking_recv().unwrap();
            assert_eq!(suspension.window.title, "Beam");
            suspension
                .respond
                .send(json!({"Beam": {"grade": "C40"}}))
                .unwrap();
        });
        let mut ctx = Context::for_tests();
        ctx.set_silent(false);
        ctx.interaction = InteractionState::connected(tx, Arc::default());
        let values = request_inputs(&mut ctx, &mut window()).unwrap();
        driver.join().unwrap();
        assert_eq!(Json::Object(values), json!({"grade": "C40", "b": 300}));
        assert!(ctx.ui_windows.is_empty());
    }

    #[test]
    fn dropped_driver_cancels() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut ctx = Context::for_tests();
        ctx.set_silent(false);
        ctx.interaction = InteractionState::connected(tx, Arc::default());
        assert_eq!(
            request_inputs(&mut ctx, &mut window()),
            Err(InteractionError::Cancelled)
        );
        ctx.interaction = InteractionState::default();
        assert_eq!(
            request_inputs(&mut ctx, &mut window()),
            Err(InteractionError::NotConnected)
        );
    }
}
