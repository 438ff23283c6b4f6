pub mod account;
pub mod event;
pub mod graph;
pub mod mandate;
pub mod payment;
pub mod ports;
