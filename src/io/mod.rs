//! Case loading and saving. The numerical core never touches files; everything here converts
//! between on-disk formats and a validated [`Network`](crate::basic::network::Network).

pub mod csv_case;
pub mod json;

pub use csv_case::load_csv_folder;
pub use json::{Case, load_case};
