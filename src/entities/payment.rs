use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

static CARD_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{12,19}$").unwrap());
static CARD_CCV: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{3,4}$").unwrap());
static CARD_EXPIRY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(0[1-9]|1[0-2])/[0-9]{2}$").unwrap());
static SWIFT_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{8}([A-Za-z0-9]{3})?$").unwrap());
static IBAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]{2}[0-9]{2}[A-Za-z0-9]{11,30}$").unwrap());

/// Payment method kind, which drives order payment routing
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentKind {
    #[sea_orm(string_value = "credit_card")]
    CreditCard,
    #[sea_orm(string_value = "cash_on_delivery")]
    CashOnDelivery,
    #[sea_orm(string_value = "bank_transfer")]
    BankTransfer,
}

impl PaymentKind {
    /// Card payments are settled through the hosted checkout flow.
    pub fn requires_checkout(&self) -> bool {
        matches!(self, PaymentKind::CreditCard)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct CardDetails {
    #[validate(length(min = 1, max = 255, message = "The holder name field is required"))]
    pub holder_name: String,
    #[validate(regex(path = "CARD_NUMBER", message = "The card number must be 12 to 19 digits"))]
    pub number: String,
    #[validate(regex(path = "CARD_CCV", message = "The ccv must be 3 or 4 digits"))]
    pub ccv: String,
    #[validate(regex(path = "CARD_EXPIRY", message = "The expire date must use the MM/YY format"))]
    pub expire_date: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct CashOnDeliveryDetails {
    #[validate(length(min = 1, max = 255, message = "The first name field is required"))]
    pub first_name: String,
    #[validate(length(min = 1, max = 255, message = "The last name field is required"))]
    pub last_name: String,
    #[validate(length(min = 1, max = 1000, message = "The address field is required"))]
    pub address: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct BankTransferDetails {
    #[validate(regex(path = "SWIFT_CODE", message = "The swift code must be 8 or 11 characters"))]
    pub swift: String,
    #[validate(regex(path = "IBAN", message = "The iban is not valid"))]
    pub iban: String,
    #[validate(length(min = 1, max = 255, message = "The name field is required"))]
    pub name: String,
}

/// Method-specific payment details, tagged by payment kind
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentDetails {
    CreditCard(CardDetails),
    CashOnDelivery(CashOnDeliveryDetails),
    BankTransfer(BankTransferDetails),
}

impl PaymentDetails {
    pub fn kind(&self) -> PaymentKind {
        match self {
            PaymentDetails::CreditCard(_) => PaymentKind::CreditCard,
            PaymentDetails::CashOnDelivery(_) => PaymentKind::CashOnDelivery,
            PaymentDetails::BankTransfer(_) => PaymentKind::BankTransfer,
        }
    }

    /// Validates the variant's own fields.
    pub fn validate(&self) -> Result<(), validator::ValidationErrors> {
        match self {
            PaymentDetails::CreditCard(details) => details.validate(),
            PaymentDetails::CashOnDelivery(details) => details.validate(),
            PaymentDetails::BankTransfer(details) => details.validate(),
        }
    }

    /// Copy safe to return to clients: card number reduced to its last four digits, no ccv.
    pub fn redacted(&self) -> Self {
        match self {
            PaymentDetails::CreditCard(card) => {
                let hidden = card.number.chars().count().saturating_sub(4);
                let number = card
                    .number
                    .chars()
                    .enumerate()
                    .map(|(i, c)| if i < hidden { '*' } else { c })
                    .collect();
                PaymentDetails::CreditCard(CardDetails {
                    holder_name: card.holder_name.clone(),
                    number,
                    ccv: String::new(),
                    expire_date: card.expire_date.clone(),
                })
            }
            other => other.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub kind: PaymentKind,
    #[sea_orm(column_type = "Json")]
    pub details: PaymentDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
