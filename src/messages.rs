//! Message resolution (what to say and which buttons to offer) and rendering
//! of stored templates into transport-ready messages.
use reqwest::Url;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{instrument, warn};

use crate::config::Config;
use crate::db::{self, Pool};
use crate::error::{Error, Result};
use crate::model::{
    Command, ContextEntity, FormStage, Guest, GuestForm, InitialCommand, InvitationRequest,
    MessageReference, RenderedMessage, RequiredData,
};
use crate::storage::BlobStore;
use crate::template::{TemplateRenderer, TemplateVars};

/// A stored message reference with the buttons to attach to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageData {
    pub message_ref: MessageReference,
    pub commands: Vec<Command>,
}

/// Pre-authentication prompt and the buttons tagged with it.
#[instrument(skip_all, fields(initial_command = initial_command.as_str()))]
pub async fn by_initial_command(pool: &Pool, initial_command: InitialCommand) -> Result<MessageData> {
    let message_ref = db::messages::get_by_initial_command(pool, initial_command).await?;
    let commands = db::commands::filter_by_initial_command(pool, initial_command).await?;
    Ok(MessageData {
        message_ref,
        commands,
    })
}

/// Prompt of a form stage. Negative feedback buttons come last.
#[instrument(skip_all, fields(stage = stage.as_str()))]
pub async fn by_form_stage(pool: &Pool, stage: FormStage) -> Result<MessageData> {
    let message_ref = db::messages::get_by_form_stage(pool, stage).await?;
    let commands = db::commands::filter_by_form_stage(pool, stage).await?;
    Ok(MessageData {
        message_ref,
        commands,
    })
}

/// Answer to a menu command: the command's message plus every general
/// purpose command available to the guest.
#[instrument(skip_all, fields(guest_id = guest_id, command_id = command.command_id))]
pub async fn by_command(pool: &Pool, guest_id: i64, command: &Command) -> Result<MessageData> {
    let message_ref = db::messages::get_by_command(pool, command.command_id).await?;
    let commands = db::commands::filter_available_for_guest(pool, guest_id).await?;
    Ok(MessageData {
        message_ref,
        commands,
    })
}

#[instrument(skip_all, fields(notification_id = notification_id))]
pub async fn by_notification(pool: &Pool, notification_id: i64) -> Result<MessageData> {
    let message_ref = db::messages::get_by_notification(pool, notification_id).await?;
    Ok(MessageData {
        message_ref,
        commands: Vec::new(),
    })
}

/// Snapshots a template may pull fields from.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderContext<'a> {
    pub guest: Option<&'a Guest>,
    pub guest_form: Option<&'a GuestForm>,
    pub invitation_request: Option<&'a InvitationRequest>,
}

impl<'a> RenderContext<'a> {
    pub fn new(
        guest: &'a Guest,
        guest_form: &'a GuestForm,
        invitation_request: Option<&'a InvitationRequest>,
    ) -> Self {
        Self {
            guest: Some(guest),
            guest_form: Some(guest_form),
            invitation_request,
        }
    }
}

pub struct MessageFactory {
    storage: Arc<dyn BlobStore>,
    renderer: Arc<dyn TemplateRenderer>,
    base_files_url: Url,
}

impl MessageFactory {
    pub fn new(
        storage: Arc<dyn BlobStore>,
        renderer: Arc<dyn TemplateRenderer>,
        base_files_url: Url,
    ) -> Self {
        Self {
            storage,
            renderer,
            base_files_url,
        }
    }

    pub fn from_config(
        cfg: &Config,
        storage: Arc<dyn BlobStore>,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Result<Self> {
        let base_files_url = Url::parse(&cfg.storage.base_files_url)
            .map_err(|e| Error::Storage(format!("invalid base files url: {}", e)))?;
        Ok(Self::new(storage, renderer, base_files_url))
    }

    #[instrument(skip_all, fields(template = %data.message_ref.text_filepath))]
    pub async fn render(
        &self,
        data: &MessageData,
        ctx: &RenderContext<'_>,
    ) -> Result<RenderedMessage> {
        let reference = &data.message_ref;
        let bytes = self.storage.get(&reference.text_filepath).await?;
        let source = String::from_utf8(bytes).map_err(|_| {
            Error::Template(format!("{} is not valid UTF-8", reference.text_filepath))
        })?;

        let vars = match &reference.required_data {
            Some(required) => build_vars(required, ctx)?,
            None => TemplateVars::new(),
        };
        let text = self.renderer.render(&source, &vars)?;

        let image_url = reference
            .image_filepath
            .as_deref()
            .map(|path| {
                self.base_files_url
                    .join(path)
                    .map(String::from)
                    .map_err(|e| Error::Storage(format!("invalid image path {}: {}", path, e)))
            })
            .transpose()?;

        Ok(RenderedMessage {
            text,
            image_url,
            buttons: data.commands.clone(),
        })
    }
}

/// Flatten the requested fields into `{entity}__{field}` variables.
fn build_vars(required: &RequiredData, ctx: &RenderContext<'_>) -> Result<TemplateVars> {
    let placeholder_request = InvitationRequest::default();
    let mut vars = TemplateVars::new();
    for (entity, fields) in required {
        let snapshot = match entity {
            ContextEntity::Guest => to_object(
                ctx.guest
                    .ok_or(Error::RequiredContextMissing(ContextEntity::Guest.as_str()))?,
            )?,
            ContextEntity::GuestForm => to_object(
                ctx.guest_form
                    .ok_or(Error::RequiredContextMissing(ContextEntity::GuestForm.as_str()))?,
            )?,
            ContextEntity::InvitationRequest => {
                to_object(ctx.invitation_request.unwrap_or(&placeholder_request))?
            }
        };
        for field in fields {
            match snapshot.get(field) {
                Some(value) => {
                    vars.insert(format!("{}__{}", entity.as_str(), field), display_value(value));
                }
                None => warn!(entity = entity.as_str(), field = %field, "unknown template field"),
            }
        }
    }
    Ok(vars)
}

fn to_object<T: Serialize>(snapshot: &T) -> Result<serde_json::Map<String, Value>> {
    match serde_json::to_value(snapshot)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Template(format!("context is not an object: {}", other))),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Gender, GuestCategory};
    use crate::template::JinjaRenderer;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    struct StaticStore(HashMap<String, Vec<u8>>);

    #[async_trait]
    impl BlobStore for StaticStore {
        async fn get(&self, key: &str) -> Result<Vec<u8>> {
            self.0
                .get(key)
                .cloned()
                .ok_or_else(|| Error::Storage(key.to_string()))
        }
        async fn put(&self, _key: &str, _bytes: Vec<u8>) -> Result<()> {
            Ok(())
        }
        async fn healthcheck(&self) -> Result<()> {
            Ok(())
        }
    }

    fn factory(templates: &[(&str, &str)]) -> MessageFactory {
        let store = StaticStore(
            templates
                .iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect(),
        );
        MessageFactory::new(
            Arc::new(store),
            Arc::new(JinjaRenderer::default()),
            Url::parse("https://files.example.com/wedding/").unwrap(),
        )
    }

    fn guest() -> Guest {
        Guest {
            guest_id: 1,
            first_name: "Anna".into(),
            last_name: "Ivanova".into(),
            patronymic: None,
            phone_number: "79999999999".into(),
            birth_date: NaiveDate::from_ymd_opt(1995, 4, 12).unwrap(),
            gender: Gender::Female,
            category: GuestCategory::Friend,
            is_resident: true,
            is_registration_guest: false,
        }
    }

    fn data(template: &str, image: Option<&str>, required: Option<&str>) -> MessageData {
        MessageData {
            message_ref: MessageReference {
                text_filepath: template.into(),
                image_filepath: image.map(String::from),
                required_data: required.map(|r| serde_json::from_str(r).unwrap()),
            },
            commands: Vec::new(),
        }
    }

    #[tokio::test]
    async fn renders_projected_fields_and_image_url() {
        let factory = factory(&[(
            "t.html",
            "Hi {{ guests__first_name }}{{guests__patronymic}} ({{guests__gender}}) at {{guests_forms__stage}}",
        )]);
        let guest = guest();
        let form = GuestForm::new(1, FormStage::AwaitingAnswer);
        let msg = factory
            .render(
                &data(
                    "t.html",
                    Some("img/rings.png"),
                    Some(r#"{"guests": ["first_name", "patronymic", "gender", "no_such"], "guests_forms": ["stage"]}"#),
                ),
                &RenderContext::new(&guest, &form, None),
            )
            .await
            .unwrap();
        assert_eq!(msg.text, "Hi Anna (F) at awaiting_answer");
        assert_eq!(
            msg.image_url.as_deref(),
            Some("https://files.example.com/wedding/img/rings.png")
        );
    }

    #[tokio::test]
    async fn absent_invitation_request_renders_empty() {
        let factory = factory(&[("t.html", "[{{invitations_requests__address}}]")]);
        let msg = factory
            .render(
                &data("t.html", None, Some(r#"{"invitations_requests": ["address"]}"#)),
                &RenderContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(msg.text, "[]");
        assert!(msg.image_url.is_none());
    }

    #[tokio::test]
    async fn absent_guest_is_required_context_missing() {
        let factory = factory(&[("t.html", "{{guests__first_name}}")]);
        let err = factory
            .render(
                &data("t.html", None, Some(r#"{"guests": ["first_name"]}"#)),
                &RenderContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RequiredContextMissing("guests")));
    }

    #[tokio::test]
    async fn non_utf8_template_is_rejected() {
        let store = StaticStore(HashMap::from([("bad.html".to_string(), vec![0xff, 0xfe])]));
        let factory = MessageFactory::new(
            Arc::new(store),
            Arc::new(JinjaRenderer::default()),
            Url::parse("https://files.example.com/").unwrap(),
        );
        let err = factory
            .render(&data("bad.html", None, None), &RenderContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Template(_)));
    }
}
