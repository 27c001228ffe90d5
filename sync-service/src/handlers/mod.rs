pub mod connect;
pub mod health;
pub mod poll;
pub mod rows;
pub mod submissions;
pub mod tables;
