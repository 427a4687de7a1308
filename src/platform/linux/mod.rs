pub mod xcb;
