//! Geometry: SE3 transforms, epipolar and PnP verification solvers.

pub mod fundamental;
pub mod pnp;
pub mod se3;

pub use fundamental::{find_fundamental_ransac, FundamentalResult};
pub use pnp::{solve_pnp_ransac, PnPResult};
pub use se3::SE3;
