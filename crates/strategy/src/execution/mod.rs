pub mod chainlink;
pub mod contracts;
pub mod ledger;
pub mod paper;
pub mod venue;
