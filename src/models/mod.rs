pub mod items;
pub mod settings;
pub mod trip;

pub use items::{
    BookingItem, BookingType, ExpenseItem, InfoItem, JournalItem, ScheduleCategory, ScheduleItem,
    ShoppingItem, TripEntry,
};
pub use settings::{Tab, UiState};
pub use trip::{Currency, Member, Trip};
