pub mod doctor;
pub mod history;
pub mod providers;
pub mod run;
