use crate::{
    context::soft::Presenter,
    error::{Error, Result},
    surface::NativeWindow,
};
use raw_window_handle::RawWindowHandle;
use std::{fmt, sync::Arc};
use x11rb::{
    connection::{Connection, RequestConnection},
    protocol::xproto::{self, ConnectionExt},
    xcb_ffi::XCBConnection,
};

// Fixed part of a PutImage request.
const PUT_IMAGE_HEADER: usize = 24;

/// Blits presented software frames into their X window.
pub(super) struct XcbPresenter {
    conn: Arc<XCBConnection>,
    gcontext: xproto::Gcontext,
    depth: u8,
}

impl fmt::Debug for XcbPresenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XcbPresenter")
            .field("gcontext", &self.gcontext)
            .field("depth", &self.depth)
            .finish()
    }
}

impl XcbPresenter {
    pub(super) fn new(conn: Arc<XCBConnection>, gcontext: xproto::Gcontext, depth: u8) -> Self {
        Self {
            conn,
            gcontext,
            depth,
        }
    }
}

impl Presenter for XcbPresenter {
    fn present(&self, native: &NativeWindow, width: u32, height: u32, pixels: &[u32]) -> Result<()> {
        let window = match native.window {
            RawWindowHandle::Xcb(handle) => handle.window,
            other => return Err(Error::Other(format!("not an X11 window: {:?}", other))),
        };
        let stride = width as usize * 4;
        if stride == 0 || height == 0 {
            return Ok(());
        }
        let mut data = Vec::with_capacity(pixels.len() * 4);
        for pixel in pixels {
            data.extend_from_slice(&pixel.to_le_bytes());
        }

        // Large frames go out in bands of rows that fit one request.
        let budget = self.conn.maximum_request_bytes().saturating_sub(PUT_IMAGE_HEADER);
        let rows = (budget / stride).max(1);
        for (band, chunk) in data.chunks(rows * stride).enumerate() {
            self.conn.put_image(
                xproto::ImageFormat::ZPixmap,
                window,
                self.gcontext,
                width as u16,
                (chunk.len() / stride) as u16,
                0,
                (band * rows) as i16,
                0,
                self.depth,
                chunk,
            )?;
        }
        self.conn.flush()?;
        Ok(())
    }
}
