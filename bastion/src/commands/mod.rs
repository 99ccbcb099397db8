pub mod check;
pub mod generate_host_key;
pub mod run;
