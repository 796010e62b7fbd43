pub mod health;
pub mod instance;
pub mod params;
pub mod version;
