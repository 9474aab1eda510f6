use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    #[default]
    Schedule,
    Bookings,
    Expenses,
    Journal,
    Shopping,
    Info,
}

impl Tab {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tab::Schedule => "schedule",
            Tab::Bookings => "bookings",
            Tab::Expenses => "expenses",
            Tab::Journal => "journal",
            Tab::Shopping => "shopping",
            Tab::Info => "info",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UiState {
    pub current_trip_id: Option<String>,
    pub active_tab: Tab,
}
