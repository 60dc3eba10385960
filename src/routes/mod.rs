pub mod decide;
pub mod health;
