pub mod attendance;
pub mod employee;
pub mod scan;
pub mod unknown_rfid;
