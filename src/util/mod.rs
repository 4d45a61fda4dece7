mod array_map;
pub use array_map::{ArrayMap, AsUsize};

mod comma_separated;
pub use comma_separated::{CommaSeparated};
