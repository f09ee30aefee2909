pub mod accountant;
pub mod clock;
pub mod decision;
pub mod guard;
pub mod keeper;
pub mod oracle;
pub mod strategy;
pub mod trade_sizer;
