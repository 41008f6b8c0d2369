//! Guest form state machine.
//!
//! Each open stage has one handler. A handler accepts only the triggers its
//! stage expects, moves the form strictly forward and records the matching
//! invitation request change. Form and request writes of one transition are
//! committed together.
use tracing::{info, instrument};

use crate::db::{self, Pool};
use crate::error::{Error, Result};
use crate::geocoder::Geocoder;
use crate::model::{
    Command, Coordinates, FormStage, GuestForm, InvitationRequest, InvitationRequestPatch,
};

/// Input that drives the form forward.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    Button(Command),
    Text(String),
    Location(Coordinates),
}

impl Trigger {
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Button(_) => "button",
            Trigger::Text(_) => "text",
            Trigger::Location(_) => "location",
        }
    }
}

/// Outcome of one accepted trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub guest_form: GuestForm,
    /// Request as stored after the transition, when the handler touched it.
    pub invitation_request: Option<InvitationRequest>,
    /// The caller should remove the one-shot reply keyboard.
    pub should_delete_reply_keyboard: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    AwaitingAnswer,
    InvitationNeediness,
    AddressInput,
    GeotagValidation,
    AddressSpecification,
    AdditionalInfo,
}

impl Handler {
    /// Handler of an open stage; terminal stages have none.
    pub fn for_stage(stage: FormStage) -> Option<Self> {
        match stage {
            FormStage::AwaitingAnswer => Some(Handler::AwaitingAnswer),
            FormStage::InvitationNeedinessAsked => Some(Handler::InvitationNeediness),
            FormStage::InvitationAddressInput | FormStage::InvitationAddressTextInput => {
                Some(Handler::AddressInput)
            }
            FormStage::InvitationGeotagValidation => Some(Handler::GeotagValidation),
            FormStage::InvitationInfoSpecification => Some(Handler::AddressSpecification),
            FormStage::FillingAdditionalInfo => Some(Handler::AdditionalInfo),
            FormStage::Declined | FormStage::Completed => None,
        }
    }

    pub fn should_delete_reply_keyboard(&self) -> bool {
        matches!(self, Handler::AddressInput)
    }
}

enum Effect {
    None,
    CreateRequest,
    Patch(InvitationRequestPatch),
    SetAdditionalInfo(String),
}

struct Step {
    next: FormStage,
    effect: Effect,
}

impl Step {
    fn to(next: FormStage) -> Self {
        Self {
            next,
            effect: Effect::None,
        }
    }

    fn with(next: FormStage, effect: Effect) -> Self {
        Self { next, effect }
    }
}

/// Decide where `trigger` leads from `stage`. Reverse geocoding happens here,
/// before any transaction is opened.
async fn plan(
    stage: FormStage,
    handler: Handler,
    trigger: Trigger,
    geocoder: &dyn Geocoder,
    language_code: &str,
) -> Result<Step> {
    let undefined = |trigger: &Trigger| Error::UndefinedTrigger {
        stage,
        trigger: trigger.kind(),
    };

    let step = match (handler, trigger) {
        (Handler::AwaitingAnswer, Trigger::Button(command)) => {
            if command.is_negative_feedback {
                Step::to(FormStage::Declined)
            } else {
                Step::to(FormStage::InvitationNeedinessAsked)
            }
        }
        (Handler::InvitationNeediness, Trigger::Button(command)) => {
            if command.is_negative_feedback {
                Step::to(FormStage::FillingAdditionalInfo)
            } else {
                Step::with(FormStage::InvitationAddressInput, Effect::CreateRequest)
            }
        }
        (Handler::AddressInput, Trigger::Location(coordinates))
            if stage == FormStage::InvitationAddressInput =>
        {
            let address = geocoder.reverse_geocode(coordinates, language_code).await?;
            Step::with(
                FormStage::InvitationGeotagValidation,
                Effect::Patch(InvitationRequestPatch::address(Some(address))),
            )
        }
        (Handler::AddressInput, Trigger::Text(text)) => Step::with(
            FormStage::InvitationInfoSpecification,
            Effect::Patch(InvitationRequestPatch::address(Some(text))),
        ),
        (Handler::GeotagValidation, Trigger::Button(command)) => {
            if command.is_negative_feedback {
                Step::with(
                    FormStage::InvitationAddressTextInput,
                    Effect::Patch(InvitationRequestPatch::address(None)),
                )
            } else {
                Step::to(FormStage::InvitationInfoSpecification)
            }
        }
        (Handler::AddressSpecification, Trigger::Text(text)) => Step::with(
            FormStage::FillingAdditionalInfo,
            Effect::Patch(InvitationRequestPatch::address_specification(Some(text))),
        ),
        (Handler::AdditionalInfo, Trigger::Text(text)) => {
            Step::with(FormStage::Completed, Effect::SetAdditionalInfo(text))
        }
        (_, trigger) => return Err(undefined(&trigger)),
    };
    Ok(step)
}

/// Apply `trigger` to the guest's form and persist the result atomically.
///
/// Triggers a stage does not accept yield `UndefinedTrigger` and leave the
/// stored form untouched; any later failure rolls the whole transition back.
#[instrument(skip_all, fields(guest_id = form.guest_id, stage = form.stage.as_str(), trigger = trigger.kind()))]
pub async fn advance(
    pool: &Pool,
    geocoder: &dyn Geocoder,
    language_code: &str,
    form: &GuestForm,
    trigger: Trigger,
) -> Result<Transition> {
    let handler = Handler::for_stage(form.stage).ok_or(Error::UndefinedTrigger {
        stage: form.stage,
        trigger: trigger.kind(),
    })?;
    let step = plan(form.stage, handler, trigger, geocoder, language_code).await?;

    let mut updated = form.clone();
    updated.stage = step.next;
    if let Effect::SetAdditionalInfo(info) = &step.effect {
        updated.additional_info = Some(info.clone());
    }

    let mut tx = pool.begin().await?;
    let guest_form = db::forms::update_form(&mut *tx, &updated).await?;
    let invitation_request = match step.effect {
        Effect::None | Effect::SetAdditionalInfo(_) => None,
        Effect::CreateRequest => Some(
            db::forms::create_invitation_request(
                &mut *tx,
                &InvitationRequest {
                    guest_id: form.guest_id,
                    ..Default::default()
                },
            )
            .await?,
        ),
        Effect::Patch(patch) => {
            Some(db::forms::patch_invitation_request(&mut *tx, form.guest_id, &patch).await?)
        }
    };
    tx.commit().await?;

    info!(from = form.stage.as_str(), to = guest_form.stage.as_str(), "form advanced");
    Ok(Transition {
        guest_form,
        invitation_request,
        should_delete_reply_keyboard: handler.should_delete_reply_keyboard(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{insert_guest, setup_pool};
    use async_trait::async_trait;

    struct FixedGeocoder(Option<&'static str>);

    #[async_trait]
    impl Geocoder for FixedGeocoder {
        async fn reverse_geocode(&self, _: Coordinates, _: &str) -> Result<String> {
            self.0
                .map(String::from)
                .ok_or_else(|| Error::Geocoder("unavailable".into()))
        }
    }

    fn button(negative: bool) -> Trigger {
        Trigger::Button(Command {
            command_id: 1,
            text: if negative { "No" } else { "Yes" }.into(),
            code: Some(if negative { "no" } else { "yes" }.into()),
            initial_command: None,
            form_stage: None,
            is_restricted: false,
            is_negative_feedback: negative,
        })
    }

    fn location() -> Trigger {
        Trigger::Location(Coordinates {
            latitude: 53.9007,
            longitude: 27.6342,
        })
    }

    fn all_triggers() -> Vec<Trigger> {
        vec![button(false), button(true), Trigger::Text("x".into()), location()]
    }

    async fn form_at(pool: &Pool, phone: &str, stage: FormStage) -> GuestForm {
        let guest_id = insert_guest(pool, phone).await;
        let form = db::forms::create_form(pool, &GuestForm::new(guest_id, stage))
            .await
            .unwrap();
        db::forms::create_invitation_request(
            pool,
            &InvitationRequest {
                guest_id,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        form
    }

    #[tokio::test]
    async fn every_accepted_trigger_moves_forward() {
        let geocoder = FixedGeocoder(Some("Minsk"));
        let mut accepted = 0;
        for (i, stage) in FormStage::ALL.into_iter().enumerate() {
            for (j, trigger) in all_triggers().into_iter().enumerate() {
                let pool = setup_pool().await;
                let form = form_at(&pool, &format!("7999{}{}", i, j), stage).await;
                // Requests only exist before the address stages in this setup.
                if trigger == button(false) && stage == FormStage::InvitationNeedinessAsked {
                    sqlx::query("DELETE FROM invitations_requests")
                        .execute(&pool)
                        .await
                        .unwrap();
                }
                match advance(&pool, &geocoder, "ru", &form, trigger).await {
                    Ok(t) => {
                        accepted += 1;
                        assert!(t.guest_form.stage.rank() > stage.rank(), "{stage:?}");
                    }
                    Err(Error::UndefinedTrigger { stage: s, .. }) => assert_eq!(s, stage),
                    Err(other) => panic!("unexpected error at {stage:?}: {other:?}"),
                }
            }
        }
        assert_eq!(accepted, 11);
    }

    #[tokio::test]
    async fn undefined_trigger_keeps_stage() {
        let pool = setup_pool().await;
        let geocoder = FixedGeocoder(Some("Minsk"));
        let form = form_at(&pool, "79990000040", FormStage::AwaitingAnswer).await;

        let err = advance(&pool, &geocoder, "ru", &form, Trigger::Text("hello".into()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "undefined input text at stage awaiting_answer");
        let stored = db::forms::get_form(&pool, form.guest_id).await.unwrap();
        assert_eq!(stored.stage, FormStage::AwaitingAnswer);

        let form = form_at(&pool, "79990000041", FormStage::InvitationAddressTextInput).await;
        let err = advance(&pool, &geocoder, "ru", &form, location()).await.unwrap_err();
        assert!(matches!(err, Error::UndefinedTrigger { trigger: "location", .. }));
    }

    #[tokio::test]
    async fn failed_side_effect_rolls_back_stage() {
        let pool = setup_pool().await;
        let geocoder = FixedGeocoder(Some("Minsk"));
        let form = form_at(&pool, "79990000042", FormStage::InvitationAddressInput).await;
        sqlx::query("DELETE FROM invitations_requests")
            .execute(&pool)
            .await
            .unwrap();

        let err = advance(&pool, &geocoder, "ru", &form, Trigger::Text("Lenina 1".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ObjectNotFound(_)));
        let stored = db::forms::get_form(&pool, form.guest_id).await.unwrap();
        assert_eq!(stored.stage, FormStage::InvitationAddressInput);
    }

    #[tokio::test]
    async fn geocoder_failure_keeps_stage() {
        let pool = setup_pool().await;
        let form = form_at(&pool, "79990000043", FormStage::InvitationAddressInput).await;
        let err = advance(&pool, &FixedGeocoder(None), "ru", &form, location())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Geocoder(_)));
        let stored = db::forms::get_form(&pool, form.guest_id).await.unwrap();
        assert_eq!(stored.stage, FormStage::InvitationAddressInput);
    }

    #[tokio::test]
    async fn rejecting_geotag_clears_address_only() {
        let pool = setup_pool().await;
        let geocoder = FixedGeocoder(Some("Minsk"));
        let form = form_at(&pool, "79990000044", FormStage::InvitationAddressInput).await;
        let t = advance(&pool, &geocoder, "ru", &form, location()).await.unwrap();
        assert!(t.should_delete_reply_keyboard);
        assert_eq!(t.invitation_request.unwrap().address.as_deref(), Some("Minsk"));

        let t = advance(&pool, &geocoder, "ru", &t.guest_form, button(true))
            .await
            .unwrap();
        assert!(!t.should_delete_reply_keyboard);
        assert_eq!(t.guest_form.stage, FormStage::InvitationAddressTextInput);
        assert_eq!(t.invitation_request.unwrap().address, None);

        let t = advance(&pool, &geocoder, "ru", &t.guest_form, Trigger::Text("Lenina 1".into()))
            .await
            .unwrap();
        assert!(t.should_delete_reply_keyboard);
        assert_eq!(t.guest_form.stage, FormStage::InvitationInfoSpecification);
        assert_eq!(t.invitation_request.unwrap().address.as_deref(), Some("Lenina 1"));
    }
}
