pub mod bcache;
pub mod cryptsetup;
pub mod dasd;
pub mod iscsi;
pub mod lvm;
pub mod mdadm;
pub mod mkfs;
pub mod mount;
pub mod parted;
pub mod resizefs;
pub mod sfdisk;
pub mod sgdisk;
pub mod udev;
pub mod zfs;
