// ETHDFS — NETWORK MODULE
//   datapath.rs — AF_PACKET raw-socket link driver and interface scan
pub mod datapath;
