#![doc = env!("CARGO_PKG_DESCRIPTION")]

#[doc(inline)]
pub use ptyalign_image as image;

#[doc(inline)]
pub use ptyalign_imgproc as imgproc;

#[doc(inline)]
pub use ptyalign_io as io;

#[doc(inline)]
pub use ptyalign_register as register;
