use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    str::FromStr,
};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::items::{
        BookingItem, ExpenseItem, InfoItem, JournalItem, ScheduleItem, ShoppingItem, TripEntry,
    },
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Twd,
    Jpy,
    Krw,
    Usd,
    Eur,
    Gbp,
    Thb,
    Cny,
    Hkd,
    Sgd,
    Aud,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Twd => "TWD",
            Currency::Jpy => "JPY",
            Currency::Krw => "KRW",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Thb => "THB",
            Currency::Cny => "CNY",
            Currency::Hkd => "HKD",
            Currency::Sgd => "SGD",
            Currency::Aud => "AUD",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Currency {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(raw.trim().to_ascii_uppercase()))
            .map_err(|_| AppError::BadRequest(format!("unsupported currency: {raw}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub email: String,
    pub pin: String,
}

impl Member {
    pub fn new(name: impl Into<String>, pin: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            avatar: String::new(),
            email: String::new(),
            pin: pin.into(),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::BadRequest("member name is required".into()));
        }
        if self.pin.len() != 4 || !self.pin.chars().all(|c| c.is_ascii_digit()) {
            return Err(AppError::BadRequest("member PIN must be 4 digits".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub id: String,
    #[serde(alias = "destination")]
    pub dest: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub base_currency: Currency,
    #[serde(default)]
    pub pin: String,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub items: Vec<ScheduleItem>,
    #[serde(default)]
    pub bookings: Vec<BookingItem>,
    #[serde(default)]
    pub expenses: Vec<ExpenseItem>,
    #[serde(default)]
    pub journals: Vec<JournalItem>,
    #[serde(default)]
    pub shopping_list: Vec<ShoppingItem>,
    #[serde(default)]
    pub info_items: Vec<InfoItem>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Trip {
    pub fn new(
        dest: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        base_currency: Currency,
        founder: Member,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            dest: dest.into(),
            start_date,
            end_date,
            base_currency,
            pin: String::new(),
            members: vec![founder],
            items: Vec::new(),
            bookings: Vec::new(),
            expenses: Vec::new(),
            journals: Vec::new(),
            shopping_list: Vec::new(),
            info_items: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.id.trim().is_empty() {
            return Err(AppError::BadRequest("trip id is required".into()));
        }
        if self.dest.trim().is_empty() {
            return Err(AppError::BadRequest("destination is required".into()));
        }
        if self.start_date > self.end_date {
            return Err(AppError::BadRequest(
                "start date must not be after end date".into(),
            ));
        }
        if self.members.is_empty() {
            return Err(AppError::BadRequest("a trip needs at least one member".into()));
        }
        let mut member_ids = HashSet::new();
        for member in &self.members {
            member.validate()?;
            if !member_ids.insert(member.id.as_str()) {
                return Err(AppError::BadRequest(format!("member {} appears twice", member.id)));
            }
        }
        validate_entries(&self.items)?;
        validate_entries(&self.bookings)?;
        validate_entries(&self.expenses)?;
        validate_entries(&self.journals)?;
        validate_entries(&self.shopping_list)?;
        validate_entries(&self.info_items)?;
        Ok(())
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    pub fn days(&self) -> Vec<NaiveDate> {
        self.start_date
            .iter_days()
            .take_while(|day| *day <= self.end_date)
            .collect()
    }

    pub fn day_schedule(&self, date: NaiveDate) -> Vec<&ScheduleItem> {
        let mut day: Vec<&ScheduleItem> =
            self.items.iter().filter(|item| item.date == date).collect();
        day.sort_by(|a, b| a.time.cmp(&b.time));
        day
    }

    pub fn member(&self, member_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.id == member_id)
    }
}

fn validate_entries<T: TripEntry>(entries: &[T]) -> Result<(), AppError> {
    let mut seen = HashSet::new();
    for entry in entries {
        entry.validate()?;
        if entry.id().trim().is_empty() {
            return Err(AppError::BadRequest(format!("{}: entry id is required", T::COLLECTION)));
        }
        if !seen.insert(entry.id()) {
            return Err(AppError::BadRequest(format!(
                "{}: id {} appears twice",
                T::COLLECTION,
                entry.id()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    #[test]
    fn day_schedule_is_ordered_by_time() {
        let mut trip = Trip::new("Seoul", day(1), day(3), Currency::Krw, Member::new("Jin", "4321"));
        trip.items.push(ScheduleItem::new(day(2), "18:30", "Dinner"));
        trip.items.push(ScheduleItem::new(day(2), "09:00", "Palace"));
        trip.items.push(ScheduleItem::new(day(1), "07:00", "Flight"));
        trip.items.push(ScheduleItem::new(day(2), "12:15", "Market"));

        let titles: Vec<&str> = trip.day_schedule(day(2)).iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, ["Palace", "Market", "Dinner"]);
        assert_eq!(trip.days().len(), 3);
    }

    #[test]
    fn validation_catches_reversed_dates_and_missing_members() {
        let mut trip = Trip::new("Paris", day(4), day(2), Currency::Eur, Member::new("Lou", "1111"));
        assert!(matches!(trip.validate(), Err(AppError::BadRequest(_))));
        trip.end_date = day(6);
        assert!(trip.validate().is_ok());
        trip.members.clear();
        assert!(matches!(trip.validate(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn validation_rejects_duplicate_child_ids() {
        let mut trip = Trip::new("Kyoto", day(1), day(3), Currency::Jpy, Member::new("Aki", "1234"));
        let mut first = ScheduleItem::new(day(2), "09:00", "A");
        first.id = "x".into();
        let mut second = ScheduleItem::new(day(2), "10:00", "B");
        second.id = "x".into();
        trip.items = vec![first, second];
        let err = trip.validate().unwrap_err();
        assert!(err.to_string().contains("appears twice"), "{err}");

        trip.items[1].id = "y".into();
        assert!(trip.validate().is_ok());
    }

    #[test]
    fn validation_runs_the_entry_rules() {
        let mut trip = Trip::new("Kyoto", day(1), day(3), Currency::Jpy, Member::new("Aki", "1234"));
        let mut expense = ExpenseItem::new(day(2), "Taxi", -1.0, Currency::Jpy);
        expense.id = "e1".into();
        trip.expenses.push(expense);
        assert!(matches!(trip.validate(), Err(AppError::BadRequest(_))));

        trip.expenses[0].amount = 1200.0;
        trip.shopping_list.push(serde_json::from_value(json!({ "id": "s1", "title": " " })).unwrap());
        assert!(matches!(trip.validate(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn documents_keep_unknown_fields_and_accept_destination() {
        let raw = json!({
            "id": "t1",
            "destination": "Tokyo",
            "startDate": "2024-04-01",
            "endDate": "2024-04-03",
            "baseCurrency": "JPY",
            "members": [{ "id": "m1", "name": "Yui", "pin": "0420" }],
            "coverImage": "tokyo.jpg"
        });
        let trip: Trip = serde_json::from_value(raw).unwrap();
        assert_eq!(trip.dest, "Tokyo");
        assert_eq!(trip.base_currency, Currency::Jpy);
        assert_eq!(trip.extra.get("coverImage"), Some(&json!("tokyo.jpg")));

        let back = serde_json::to_value(&trip).unwrap();
        assert_eq!(back["coverImage"], json!("tokyo.jpg"));
        assert_eq!(back["dest"], json!("Tokyo"));
    }

    #[test]
    fn currency_codes_parse_case_insensitively() {
        assert_eq!("jpy".parse::<Currency>().unwrap(), Currency::Jpy);
        assert!("XYZ".parse::<Currency>().is_err());
    }
}
