//! Vendor adapters.
//!
//! One module per vendor dialect family. Product variants that differ only
//! in constants (channel count, current limit, USB product id) share one
//! adapter parameterized by a static product spec -- there are no subclass
//! chains here.

pub mod ds1000z;
pub mod hmc804x;
pub mod kt344xx;
pub mod mso456;
pub mod spd3303x;

pub use ds1000z::Ds1000z;
pub use hmc804x::{Hmc804x, HMC8041, HMC8042, HMC8043};
pub use kt344xx::{Kt344xx, AGILENT_344XXA, KEYSIGHT_344XXA};
pub use mso456::{Mso456, MSO456, MSO58};
pub use spd3303x::Spd3303x;
