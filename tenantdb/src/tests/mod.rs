pub mod common;

pub mod coordinator;

pub mod health;


pub mod registry;
