use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stage of the guest form. Stored as snake_case text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FormStage {
    AwaitingAnswer,
    InvitationNeedinessAsked,
    InvitationAddressInput,
    InvitationGeotagValidation,
    InvitationAddressTextInput,
    InvitationInfoSpecification,
    FillingAdditionalInfo,
    Declined,
    Completed,
}

impl FormStage {
    pub const ALL: [FormStage; 9] = [
        FormStage::AwaitingAnswer,
        FormStage::InvitationNeedinessAsked,
        FormStage::InvitationAddressInput,
        FormStage::InvitationGeotagValidation,
        FormStage::InvitationAddressTextInput,
        FormStage::InvitationInfoSpecification,
        FormStage::FillingAdditionalInfo,
        FormStage::Declined,
        FormStage::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FormStage::AwaitingAnswer => "awaiting_answer",
            FormStage::InvitationNeedinessAsked => "invitation_neediness_asked",
            FormStage::InvitationAddressInput => "invitation_address_input",
            FormStage::InvitationGeotagValidation => "invitation_geotag_validation",
            FormStage::InvitationAddressTextInput => "invitation_address_text_input",
            FormStage::InvitationInfoSpecification => "invitation_info_specification",
            FormStage::FillingAdditionalInfo => "filling_additional_info",
            FormStage::Declined => "declined",
            FormStage::Completed => "completed",
        }
    }

    pub fn parse_stage(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == s)
    }

    /// Position in a topological order of the transition graph. Every
    /// transition strictly increases it.
    pub fn rank(&self) -> u8 {
        match self {
            FormStage::AwaitingAnswer => 0,
            FormStage::InvitationNeedinessAsked => 1,
            FormStage::InvitationAddressInput => 2,
            FormStage::InvitationGeotagValidation => 3,
            FormStage::InvitationAddressTextInput => 4,
            FormStage::InvitationInfoSpecification => 5,
            FormStage::FillingAdditionalInfo => 6,
            FormStage::Declined => 7,
            FormStage::Completed => 8,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FormStage::Declined | FormStage::Completed)
    }
}

/// Prompts shown before a guest is authenticated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InitialCommand {
    RequestContact,
    RegistrationFailed,
}

impl InitialCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitialCommand::RequestContact => "request_contact",
            InitialCommand::RegistrationFailed => "registration_failed",
        }
    }

    pub fn parse_command(s: &str) -> Option<Self> {
        match s {
            "request_contact" => Some(InitialCommand::RequestContact),
            "registration_failed" => Some(InitialCommand::RegistrationFailed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Gender {
    #[serde(rename = "F")]
    Female,
    #[serde(rename = "M")]
    Male,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Female => "F",
            Gender::Male => "M",
        }
    }

    pub fn parse_gender(s: &str) -> Option<Self> {
        match s {
            "F" => Some(Gender::Female),
            "M" => Some(Gender::Male),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GuestCategory {
    Newlyweds,
    Relative,
    Friend,
    Witness,
}

impl GuestCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuestCategory::Newlyweds => "newlyweds",
            GuestCategory::Relative => "relative",
            GuestCategory::Friend => "friend",
            GuestCategory::Witness => "witness",
        }
    }

    pub fn parse_category(s: &str) -> Option<Self> {
        match s {
            "newlyweds" => Some(GuestCategory::Newlyweds),
            "relative" => Some(GuestCategory::Relative),
            "friend" => Some(GuestCategory::Friend),
            "witness" => Some(GuestCategory::Witness),
            _ => None,
        }
    }
}

/// Entities a message template may pull fields from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContextEntity {
    #[serde(rename = "guests")]
    Guest,
    #[serde(rename = "guests_forms")]
    GuestForm,
    #[serde(rename = "invitations_requests")]
    InvitationRequest,
}

impl ContextEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextEntity::Guest => "guests",
            ContextEntity::GuestForm => "guests_forms",
            ContextEntity::InvitationRequest => "invitations_requests",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Guest {
    pub guest_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub patronymic: Option<String>,
    pub phone_number: String,
    pub birth_date: NaiveDate,
    pub gender: Gender,
    pub category: GuestCategory,
    pub is_resident: bool,
    pub is_registration_guest: bool,
}

/// Transport identity linked to a guest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TelegramUser {
    pub user_id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuestForm {
    pub guest_id: i64,
    pub stage: FormStage,
    pub additional_info: Option<String>,
    #[serde(skip)]
    pub updated_at: Option<NaiveDateTime>,
}

impl GuestForm {
    pub fn new(guest_id: i64, stage: FormStage) -> Self {
        Self {
            guest_id,
            stage,
            additional_info: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvitationRequest {
    pub guest_id: i64,
    pub address: Option<String>,
    pub address_specification: Option<String>,
}

/// Partial update of an invitation request. `None` leaves the column
/// untouched; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvitationRequestPatch {
    pub address: Option<Option<String>>,
    pub address_specification: Option<Option<String>>,
}

impl InvitationRequestPatch {
    pub fn address(address: Option<String>) -> Self {
        Self {
            address: Some(address),
            ..Default::default()
        }
    }

    pub fn address_specification(specification: Option<String>) -> Self {
        Self {
            address_specification: Some(specification),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.address.is_none() && self.address_specification.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Command {
    pub command_id: i64,
    pub text: String,
    pub code: Option<String>,
    pub initial_command: Option<InitialCommand>,
    pub form_stage: Option<FormStage>,
    pub is_restricted: bool,
    pub is_negative_feedback: bool,
}

pub type RequiredData = BTreeMap<ContextEntity, Vec<String>>;

/// Storage references for a renderable message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageReference {
    pub text_filepath: String,
    pub image_filepath: Option<String>,
    pub required_data: Option<RequiredData>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub notification_id: i64,
    pub code: String,
    pub is_personal: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Final payload handed to the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderedMessage {
    pub text: String,
    pub image_url: Option<String>,
    pub buttons: Vec<Command>,
}
