//! The persistence boundary every pipeline and coordinator writes through.
//!
//! Split by the two cores that own data: [`catalog`] holds the batch-upsert
//! contract the CORE-A buffer workers drive, [`collection`] holds the
//! per-user differential operations CORE-C's commit step drives.

pub mod catalog;
pub mod collection;
pub mod processing;
