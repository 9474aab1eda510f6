pub mod ai;
pub mod gemini;
pub mod rates;
pub mod reconciler;
pub mod remote;
pub mod storage;
pub mod subscriptions;
pub mod trips;
pub mod writer;
