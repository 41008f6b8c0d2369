//! Inbound event routing: authentication, form progress and menu replies.
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::auth;
use crate::callbacks;
use crate::db::{self, Pool};
use crate::error::{Error, Result};
use crate::form::{self, Trigger};
use crate::geocoder::Geocoder;
use crate::messages::{self, MessageFactory, RenderContext};
use crate::model::{
    FormStage, Guest, GuestForm, InitialCommand, InvitationRequest, RenderedMessage, TelegramUser,
};
use crate::transport::{DeliveryHandle, IncomingEvent, Keyboard, Transport};

const ALIVE_MARK: &str = "✅";

/// Everything an event handler needs besides the transport.
pub struct BotContext {
    pub pool: Pool,
    pub factory: MessageFactory,
    pub geocoder: Arc<dyn Geocoder>,
    pub default_command_code: String,
    pub language_code: String,
}

/// `/name` or `/name@bot`, ignoring arguments.
fn is_command(event: &IncomingEvent, name: &str) -> bool {
    if event.is_callback() {
        return false;
    }
    let Some(text) = event.trimmed_text() else {
        return false;
    };
    let Some(command) = text.strip_prefix('/') else {
        return false;
    };
    let command = command.split_whitespace().next().unwrap_or_default();
    let command = command.split('@').next().unwrap_or_default();
    command == name
}

fn is_resend(event: &IncomingEvent) -> bool {
    is_command(event, "start") || is_command(event, "resend")
}

/// A reply keyboard built from the single button of a prompt.
fn single_button(message: &RenderedMessage, make: fn(String) -> Keyboard) -> Result<Keyboard> {
    match message.buttons.as_slice() {
        [button] => Ok(make(button.text.clone())),
        buttons => Err(Error::Keyboard(format!(
            "expected exactly one button, found {}",
            buttons.len()
        ))),
    }
}

fn stage_keyboard(stage: FormStage, message: &RenderedMessage) -> Result<Keyboard> {
    match stage {
        FormStage::InvitationAddressInput => single_button(message, Keyboard::RequestLocation),
        _ => Ok(Keyboard::inline(&message.buttons)),
    }
}

#[instrument(skip_all, fields(chat_id = event.chat_id, callback = event.is_callback()))]
pub async fn handle_event(
    ctx: &BotContext,
    transport: &dyn Transport,
    event: &IncomingEvent,
) -> Result<()> {
    if is_command(event, "is_alive") {
        let alive = RenderedMessage {
            text: ALIVE_MARK.to_string(),
            image_url: None,
            buttons: Vec::new(),
        };
        transport.reply(event, &alive, &Keyboard::None).await?;
        return Ok(());
    }

    let user = TelegramUser {
        user_id: event.chat_id,
        username: event.username.clone(),
    };
    let session = match auth::authenticate(&ctx.pool, &user).await {
        Ok(guest) => db::forms::find_form(&ctx.pool, guest.guest_id)
            .await?
            .map(|form| (guest, form)),
        Err(Error::NotAuthenticated) => None,
        Err(err) => return Err(err),
    };
    let Some((guest, guest_form)) = session else {
        return handle_unauthenticated(ctx, transport, event, &user).await;
    };

    match guest_form.stage {
        FormStage::Completed => handle_completed(ctx, transport, event, &guest, &guest_form).await,
        FormStage::Declined => {
            if is_resend(event) {
                send_stage_prompt(ctx, transport, event, &guest, &guest_form, None).await?;
            } else {
                debug!(guest_id = guest.guest_id, "ignoring event from declined guest");
            }
            Ok(())
        }
        _ => handle_open_form(ctx, transport, event, &guest, &guest_form).await,
    }
}

async fn handle_unauthenticated(
    ctx: &BotContext,
    transport: &dyn Transport,
    event: &IncomingEvent,
    user: &TelegramUser,
) -> Result<()> {
    if let Some(phone) = event.contact_phone.as_deref() {
        match auth::register(&ctx.pool, phone, user).await {
            Ok((guest, guest_form)) => {
                transport.clear_reply_keyboard(event).await?;
                send_stage_prompt(ctx, transport, event, &guest, &guest_form, None).await?;
                return Ok(());
            }
            Err(err @ (Error::NotAuthenticated | Error::Integrity(_))) => {
                info!(%err, "registration rejected");
                let data =
                    messages::by_initial_command(&ctx.pool, InitialCommand::RegistrationFailed)
                        .await?;
                let message = ctx.factory.render(&data, &RenderContext::default()).await?;
                transport.reply(event, &message, &Keyboard::None).await?;
                return Ok(());
            }
            Err(err) => return Err(err),
        }
    }

    let data = messages::by_initial_command(&ctx.pool, InitialCommand::RequestContact).await?;
    let message = ctx.factory.render(&data, &RenderContext::default()).await?;
    let keyboard = single_button(&message, Keyboard::RequestContact)?;
    transport.reply(event, &message, &keyboard).await?;
    Ok(())
}

/// Reply with the prompt of the form's current stage.
async fn send_stage_prompt(
    ctx: &BotContext,
    transport: &dyn Transport,
    event: &IncomingEvent,
    guest: &Guest,
    guest_form: &GuestForm,
    invitation_request: Option<&InvitationRequest>,
) -> Result<DeliveryHandle> {
    let data = messages::by_form_stage(&ctx.pool, guest_form.stage).await?;
    let message = ctx
        .factory
        .render(&data, &RenderContext::new(guest, guest_form, invitation_request))
        .await?;
    let keyboard = stage_keyboard(guest_form.stage, &message)?;
    transport.reply(event, &message, &keyboard).await
}

async fn resend_stage_prompt(
    ctx: &BotContext,
    transport: &dyn Transport,
    event: &IncomingEvent,
    guest: &Guest,
    guest_form: &GuestForm,
) -> Result<()> {
    let request = db::forms::find_invitation_request(&ctx.pool, guest.guest_id).await?;
    send_stage_prompt(ctx, transport, event, guest, guest_form, request.as_ref()).await?;
    Ok(())
}

async fn handle_open_form(
    ctx: &BotContext,
    transport: &dyn Transport,
    event: &IncomingEvent,
    guest: &Guest,
    guest_form: &GuestForm,
) -> Result<()> {
    if is_resend(event) {
        return resend_stage_prompt(ctx, transport, event, guest, guest_form).await;
    }

    let trigger = if event.is_callback() {
        let code = event.callback_data.as_deref().filter(|c| !c.is_empty());
        let resolved = match code {
            Some(code) => {
                callbacks::resolve(
                    &ctx.pool,
                    guest.guest_id,
                    Some(code),
                    true,
                    &ctx.default_command_code,
                )
                .await
            }
            None => Err(Error::CommandNotFound),
        };
        // Buttons of an earlier prompt count as unknown.
        let resolved = resolved.and_then(|command| {
            if command.form_stage == Some(guest_form.stage) {
                Ok(command)
            } else {
                Err(Error::CommandNotFound)
            }
        });
        match resolved {
            Ok(command) => Trigger::Button(command),
            Err(Error::CommandNotFound) => {
                warn!(guest_id = guest.guest_id, ?code, "unknown button at form stage");
                return resend_stage_prompt(ctx, transport, event, guest, guest_form).await;
            }
            Err(err) => return Err(err),
        }
    } else if let Some(location) = event.location {
        Trigger::Location(location)
    } else if let Some(text) = event.trimmed_text() {
        Trigger::Text(text.to_string())
    } else {
        debug!(guest_id = guest.guest_id, "ignoring message without text or location");
        return Ok(());
    };

    let transition = form::advance(
        &ctx.pool,
        ctx.geocoder.as_ref(),
        &ctx.language_code,
        guest_form,
        trigger,
    )
    .await?;

    let request = match transition.invitation_request {
        Some(request) => Some(request),
        None => db::forms::find_invitation_request(&ctx.pool, guest.guest_id).await?,
    };
    send_stage_prompt(
        ctx,
        transport,
        event,
        guest,
        &transition.guest_form,
        request.as_ref(),
    )
    .await?;

    if event.is_callback() {
        let source = DeliveryHandle {
            chat_id: event.chat_id,
            message_id: event.message_id,
        };
        if let Err(err) = transport.clear_buttons(&source).await {
            debug!(?err, "could not clear buttons of the answered prompt");
        }
    }
    if transition.should_delete_reply_keyboard {
        transport.clear_reply_keyboard(event).await?;
    }
    Ok(())
}

async fn handle_completed(
    ctx: &BotContext,
    transport: &dyn Transport,
    event: &IncomingEvent,
    guest: &Guest,
    guest_form: &GuestForm,
) -> Result<()> {
    let code = if event.is_callback() {
        event.callback_data.as_deref()
    } else {
        None
    };
    let command =
        callbacks::resolve(&ctx.pool, guest.guest_id, code, false, &ctx.default_command_code)
            .await?;

    let data = messages::by_command(&ctx.pool, guest.guest_id, &command).await?;
    let request = db::forms::find_invitation_request(&ctx.pool, guest.guest_id).await?;
    let message = ctx
        .factory
        .render(&data, &RenderContext::new(guest, guest_form, request.as_ref()))
        .await?;
    let keyboard = Keyboard::inline(&message.buttons);

    if event.is_callback() {
        transport.update_on_callback(event, &message, &keyboard).await?;
    } else {
        transport.reply(event, &message, &keyboard).await?;
    }
    Ok(())
}
