//! Input inspection: header sniffing and media probing

pub mod prober;
pub mod sniffer;

pub use prober::MediaProber;
pub use sniffer::FormatSniffer;
