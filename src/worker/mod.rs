pub mod channel;
pub mod control;
pub mod worker;
