// Local matrix storage and conversion

pub mod icrs;
pub mod sort;
pub mod triple;

pub use icrs::{Icrs, LocalEntries};
pub use sort::{choose_radix, key, radix_sort, stable_bucket_sort, KeyMode};
pub use triple::{Triple, Triples};
