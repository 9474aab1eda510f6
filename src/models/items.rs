use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    error::AppError,
    models::trip::{Currency, Trip},
};

pub trait TripEntry: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    fn title(&self) -> &str;
    fn entries(trip: &Trip) -> &Vec<Self>;
    fn entries_mut(trip: &mut Trip) -> &mut Vec<Self>;

    fn day(&self) -> Option<NaiveDate> {
        None
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.title().trim().is_empty() {
            return Err(AppError::BadRequest(format!(
                "{}: title is required",
                Self::COLLECTION
            )));
        }
        Ok(())
    }
}

macro_rules! trip_entry {
    ($ty:ty, $collection:literal, $field:ident) => {
        impl TripEntry for $ty {
            const COLLECTION: &'static str = $collection;

            fn id(&self) -> &str {
                &self.id
            }

            fn set_id(&mut self, id: String) {
                self.id = id;
            }

            fn title(&self) -> &str {
                &self.title
            }

            fn entries(trip: &Trip) -> &Vec<Self> {
                &trip.$field
            }

            fn entries_mut(trip: &mut Trip) -> &mut Vec<Self> {
                &mut trip.$field
            }
        }
    };
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleCategory {
    #[default]
    Sightseeing,
    Food,
    Transport,
    Hotel,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleItem {
    #[serde(default)]
    pub id: String,
    pub date: NaiveDate,
    // HH:mm, fixed width so string order is time order
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub title: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub category: ScheduleCategory,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_suggestion: Option<String>,
}

impl ScheduleItem {
    pub fn new(date: NaiveDate, time: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            date,
            time: time.into(),
            end_time: None,
            title: title.into(),
            location: String::new(),
            category: ScheduleCategory::default(),
            note: String::new(),
            images: Vec::new(),
            is_completed: false,
            transport_suggestion: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BookingType {
    #[default]
    Flight,
    Hotel,
    Car,
    Spot,
    Voucher,
}

// which optional fields apply depends on `kind`; nothing checks it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookingItem {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: BookingType,
    pub title: String,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub confirmation_no: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub qr_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flight_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dep_iata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arr_iata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dep_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arr_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nights: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseItem {
    #[serde(default)]
    pub id: String,
    pub date: NaiveDate,
    pub title: String,
    pub amount: f64,
    pub currency: Currency,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer_id: Option<String>,
    #[serde(default)]
    pub split_with: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

impl ExpenseItem {
    pub fn new(date: NaiveDate, title: impl Into<String>, amount: f64, currency: Currency) -> Self {
        Self {
            id: String::new(),
            date,
            title: title.into(),
            amount,
            currency,
            method: "cash".into(),
            location: String::new(),
            payer_id: None,
            split_with: Vec::new(),
            images: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JournalItem {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub rating: u8,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingItem {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,
    #[serde(default)]
    pub is_bought: bool,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InfoItem {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub images: Vec<String>,
}

trip_entry!(BookingItem, "bookings", bookings);
trip_entry!(JournalItem, "journals", journals);
trip_entry!(ShoppingItem, "shoppingList", shopping_list);
trip_entry!(InfoItem, "infoItems", info_items);

impl TripEntry for ScheduleItem {
    const COLLECTION: &'static str = "items";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn entries(trip: &Trip) -> &Vec<Self> {
        &trip.items
    }

    fn entries_mut(trip: &mut Trip) -> &mut Vec<Self> {
        &mut trip.items
    }

    fn day(&self) -> Option<NaiveDate> {
        Some(self.date)
    }
}

impl TripEntry for ExpenseItem {
    const COLLECTION: &'static str = "expenses";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn entries(trip: &Trip) -> &Vec<Self> {
        &trip.expenses
    }

    fn entries_mut(trip: &mut Trip) -> &mut Vec<Self> {
        &mut trip.expenses
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.title.trim().is_empty() {
            return Err(AppError::BadRequest("expenses: title is required".into()));
        }
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(AppError::BadRequest(
                "expenses: amount must be a non-negative number".into(),
            ));
        }
        Ok(())
    }
}
