//! ALSA control interface backend.
//!
//! Read-write handles go through the `alsa` crate. Element info and
//! user-element creation are not covered there, so those two calls drop
//! down to `alsa-sys` on a short-lived raw handle. Read-only handles are
//! raw from the start, because the safe wrapper cannot open with
//! `SND_CTL_READONLY`.
//!
//! Every handle is nonblocking, so draining events stops at `EAGAIN`
//! instead of sleeping on an empty queue.

use std::ffi::{c_int, CStr};
use std::ptr;
use std::time::Duration;

use alsa::ctl::{Ctl, ElemId, ElemIface, ElemType, ElemValue};
use tracing::debug;

use crate::element::{
    CardBackend, CardControl, ControlEvent, ElementKind, ElementShape, EventIface, OpenMode,
    BOOT_ELEMENT_INDEX, BOOT_VALUE_COUNT, BOOT_VALUE_MAX, BOOT_VALUE_MIN,
};
use crate::error::{BootError, Result};

const BOOT_NAME: &CStr = c".Boot";

// From alsa/control.h; alsa-sys does not export these.
const SND_CTL_NONBLOCK: c_int = 0x0001;
const SND_CTL_READONLY: c_int = 0x0004;
const SND_CTL_EVENT_MASK_VALUE: u32 = 1 << 0;

// From alsa/control.h; alsa-sys does not bind these, but libasound exports them.
extern "C" {
    fn snd_ctl_elem_info_set_inactive(obj: *mut alsa_sys::snd_ctl_elem_info_t, val: c_int);
    fn snd_ctl_elem_info_set_read_write(
        obj: *mut alsa_sys::snd_ctl_elem_info_t,
        rval: c_int,
        wval: c_int,
    );
}

/// Opens `hw:<card>` control devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlsaBackend;

impl AlsaBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CardBackend for AlsaBackend {
    fn open(&self, card: i32, mode: OpenMode) -> Result<Box<dyn CardControl>> {
        let name = format!("hw:{}", card);
        match mode {
            OpenMode::ReadWrite => {
                let ctl = Ctl::new(&name, true).map_err(|e| alsa_error(card, "open", e))?;
                Ok(Box::new(AlsaControl { card, name, ctl }))
            }
            OpenMode::ReadOnly => {
                let raw = RawCtl::open(&name, card, SND_CTL_READONLY | SND_CTL_NONBLOCK)?;
                Ok(Box::new(ReadOnlyControl { card, raw }))
            }
        }
    }
}

fn alsa_error(card: i32, op: &'static str, e: alsa::Error) -> BootError {
    BootError::Control {
        card,
        op,
        message: e.to_string(),
    }
}

fn errno_error(card: i32, op: &'static str, rc: i32) -> BootError {
    BootError::Control {
        card,
        op,
        message: std::io::Error::from_raw_os_error(-rc).to_string(),
    }
}

/// An empty event queue on a nonblocking handle.
fn is_drained(errno: i32) -> bool {
    errno == libc::EAGAIN || errno == libc::EWOULDBLOCK
}

fn wait_millis(timeout: Duration) -> c_int {
    c_int::try_from(timeout.as_millis()).unwrap_or(c_int::MAX)
}

fn event_iface(iface: alsa_sys::snd_ctl_elem_iface_t) -> EventIface {
    match iface {
        alsa_sys::SND_CTL_ELEM_IFACE_CARD => EventIface::Card,
        alsa_sys::SND_CTL_ELEM_IFACE_MIXER => EventIface::Mixer,
        _ => EventIface::Other,
    }
}

fn boot_id() -> ElemId {
    let mut id = ElemId::new(ElemIface::Card);
    id.set_name(BOOT_NAME);
    id.set_index(BOOT_ELEMENT_INDEX);
    id
}

fn boot_shape(raw: &RawCtl, card: i32) -> Result<Option<ElementShape>> {
    let info = RawBootInfo::new(card)?;
    // SAFETY: both handles are live for the call.
    let rc = unsafe { alsa_sys::snd_ctl_elem_info(raw.0, info.info) };
    if rc == -libc::ENOENT {
        return Ok(None);
    }
    if rc < 0 {
        return Err(errno_error(card, "read '.Boot' info", rc));
    }

    // SAFETY: info was filled by snd_ctl_elem_info above.
    let (kind, count) = unsafe {
        (
            alsa_sys::snd_ctl_elem_info_get_type(info.info),
            alsa_sys::snd_ctl_elem_info_get_count(info.info),
        )
    };
    let kind = if kind == alsa_sys::SND_CTL_ELEM_TYPE_INTEGER64 {
        ElementKind::Integer64
    } else {
        ElementKind::Other(format!("type {}", kind))
    };
    Ok(Some(ElementShape { kind, count }))
}

/// Read-write handle.
struct AlsaControl {
    card: i32,
    name: String,
    ctl: Ctl,
}

impl AlsaControl {
    fn raw(&self) -> Result<RawCtl> {
        RawCtl::open(&self.name, self.card, SND_CTL_NONBLOCK)
    }
}

impl CardControl for AlsaControl {
    fn card(&self) -> i32 {
        self.card
    }

    fn boot_shape(&self) -> Result<Option<ElementShape>> {
        boot_shape(&self.raw()?, self.card)
    }

    fn read_boot_values(&self) -> Result<[i64; 4]> {
        let mut value = ElemValue::new(ElemType::Integer64)
            .map_err(|e| alsa_error(self.card, "read '.Boot'", e))?;
        value.set_id(&boot_id());
        self.ctl
            .elem_read(&mut value)
            .map_err(|e| alsa_error(self.card, "read '.Boot'", e))?;

        let mut values = [-1i64; 4];
        for (idx, slot) in values.iter_mut().enumerate() {
            *slot = value.get_integer64(idx as u32).ok_or(BootError::ElementShape {
                card: self.card,
                expected: "4 x INTEGER64",
                found: format!("fewer than {} values", BOOT_VALUE_COUNT),
            })?;
        }
        Ok(values)
    }

    fn create_boot(&mut self) -> Result<()> {
        let raw = self.raw()?;
        let info = RawBootInfo::new(self.card)?;
        // SAFETY: both handles are live for the calls.
        let rc = unsafe {
            // Keep the element out of saved mixer state.
            snd_ctl_elem_info_set_inactive(info.info, 1);
            snd_ctl_elem_info_set_read_write(info.info, 1, 1);
            alsa_sys::snd_ctl_add_integer64_elem_set(
                raw.0,
                info.info,
                1,
                BOOT_VALUE_COUNT,
                BOOT_VALUE_MIN,
                BOOT_VALUE_MAX,
                0,
            )
        };
        if rc < 0 {
            return Err(errno_error(self.card, "create '.Boot'", rc));
        }
        debug!(card = self.card, "created '.Boot' user element");
        Ok(())
    }

    fn write_boot_values(&mut self, values: [i64; 4]) -> Result<()> {
        let mut value = ElemValue::new(ElemType::Integer64)
            .map_err(|e| alsa_error(self.card, "write '.Boot'", e))?;
        value.set_id(&boot_id());
        for (idx, v) in values.iter().enumerate() {
            value.set_integer64(idx as u32, *v).ok_or(BootError::ElementShape {
                card: self.card,
                expected: "4 x INTEGER64",
                found: "value buffer too small".to_string(),
            })?;
        }
        self.ctl
            .elem_write(&value)
            .map_err(|e| alsa_error(self.card, "write '.Boot'", e))?;
        Ok(())
    }

    fn subscribe(&mut self, enable: bool) -> Result<()> {
        self.ctl
            .subscribe_events(enable)
            .map_err(|e| alsa_error(self.card, "subscribe", e))
    }

    fn wait(&mut self, timeout: Duration) -> Result<bool> {
        let ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        self.ctl
            .wait(Some(ms))
            .map_err(|e| alsa_error(self.card, "wait", e))
    }

    fn read_event(&mut self) -> Result<Option<ControlEvent>> {
        let event = match self.ctl.read() {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(None),
            Err(e) if is_drained(e.errno()) => return Ok(None),
            Err(e) => return Err(alsa_error(self.card, "read event", e)),
        };

        let id = event.get_id();
        let iface = match id.get_interface() {
            ElemIface::Card => EventIface::Card,
            ElemIface::Mixer => EventIface::Mixer,
            _ => EventIface::Other,
        };
        Ok(Some(ControlEvent {
            value_changed: event.get_mask().value(),
            iface,
            name: id.get_name().unwrap_or_default().to_string(),
            index: id.get_index(),
        }))
    }
}

/// Handle opened with `SND_CTL_READONLY`; the kernel refuses writes on it.
struct ReadOnlyControl {
    card: i32,
    raw: RawCtl,
}

impl CardControl for ReadOnlyControl {
    fn card(&self) -> i32 {
        self.card
    }

    fn boot_shape(&self) -> Result<Option<ElementShape>> {
        boot_shape(&self.raw, self.card)
    }

    fn read_boot_values(&self) -> Result<[i64; 4]> {
        let info = RawBootInfo::new(self.card)?;
        let value = RawValue::new(self.card)?;
        // SAFETY: all three handles are live for the calls.
        let rc = unsafe {
            alsa_sys::snd_ctl_elem_value_set_id(value.0, info.id);
            alsa_sys::snd_ctl_elem_read(self.raw.0, value.0)
        };
        if rc < 0 {
            return Err(errno_error(self.card, "read '.Boot'", rc));
        }

        let mut values = [-1i64; 4];
        for (idx, slot) in values.iter_mut().enumerate() {
            // SAFETY: value was filled by snd_ctl_elem_read; the index is
            // within the element's value storage.
            *slot = unsafe { alsa_sys::snd_ctl_elem_value_get_integer64(value.0, idx as u32) };
        }
        Ok(values)
    }

    fn create_boot(&mut self) -> Result<()> {
        Err(BootError::ReadOnly { card: self.card })
    }

    fn write_boot_values(&mut self, _values: [i64; 4]) -> Result<()> {
        Err(BootError::ReadOnly { card: self.card })
    }

    fn subscribe(&mut self, enable: bool) -> Result<()> {
        // SAFETY: raw is live.
        let rc = unsafe { alsa_sys::snd_ctl_subscribe_events(self.raw.0, c_int::from(enable)) };
        if rc < 0 {
            return Err(errno_error(self.card, "subscribe", rc));
        }
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> Result<bool> {
        // SAFETY: raw is live.
        let rc = unsafe { alsa_sys::snd_ctl_wait(self.raw.0, wait_millis(timeout)) };
        if rc < 0 {
            return Err(errno_error(self.card, "wait", rc));
        }
        Ok(rc > 0)
    }

    fn read_event(&mut self) -> Result<Option<ControlEvent>> {
        let event = RawEvent::new(self.card)?;
        // SAFETY: both handles are live for the call.
        let rc = unsafe { alsa_sys::snd_ctl_read(self.raw.0, event.0) };
        if rc < 0 && is_drained(-rc) {
            return Ok(None);
        }
        if rc < 0 {
            return Err(errno_error(self.card, "read event", rc));
        }
        if rc == 0 {
            return Ok(None);
        }

        // SAFETY: event was filled by snd_ctl_read above.
        unsafe {
            if alsa_sys::snd_ctl_event_get_type(event.0) != alsa_sys::SND_CTL_EVENT_ELEM {
                return Ok(Some(ControlEvent {
                    value_changed: false,
                    iface: EventIface::Other,
                    name: String::new(),
                    index: 0,
                }));
            }
            let mask = alsa_sys::snd_ctl_event_elem_get_mask(event.0);
            let name = alsa_sys::snd_ctl_event_elem_get_name(event.0);
            let name = if name.is_null() {
                String::new()
            } else {
                CStr::from_ptr(name).to_string_lossy().into_owned()
            };
            Ok(Some(ControlEvent {
                value_changed: mask & SND_CTL_EVENT_MASK_VALUE != 0,
                iface: event_iface(alsa_sys::snd_ctl_event_elem_get_interface(event.0)),
                name,
                index: alsa_sys::snd_ctl_event_elem_get_index(event.0),
            }))
        }
    }
}

/// Raw control handle for the calls the safe wrapper lacks.
struct RawCtl(*mut alsa_sys::snd_ctl_t);

impl RawCtl {
    fn open(name: &str, card: i32, flags: c_int) -> Result<Self> {
        let cname = std::ffi::CString::new(name).map_err(|_| {
            BootError::InvalidArgument(format!("control name {:?} contains NUL", name))
        })?;
        let mut handle = ptr::null_mut();
        // SAFETY: handle is an out-pointer, cname outlives the call.
        let rc = unsafe { alsa_sys::snd_ctl_open(&mut handle, cname.as_ptr(), flags) };
        if rc < 0 {
            return Err(errno_error(card, "open", rc));
        }
        Ok(Self(handle))
    }
}

impl Drop for RawCtl {
    fn drop(&mut self) {
        // SAFETY: opened by snd_ctl_open and closed exactly once.
        unsafe {
            alsa_sys::snd_ctl_close(self.0);
        }
    }
}

/// Element id and info addressing `.Boot`, freed on drop.
struct RawBootInfo {
    id: *mut alsa_sys::snd_ctl_elem_id_t,
    info: *mut alsa_sys::snd_ctl_elem_info_t,
}

impl RawBootInfo {
    fn new(card: i32) -> Result<Self> {
        let mut this = Self {
            id: ptr::null_mut(),
            info: ptr::null_mut(),
        };
        // SAFETY: out-pointers are valid; Drop frees whatever got allocated.
        unsafe {
            let rc = alsa_sys::snd_ctl_elem_id_malloc(&mut this.id);
            if rc < 0 {
                return Err(errno_error(card, "allocate element id", rc));
            }
            let rc = alsa_sys::snd_ctl_elem_info_malloc(&mut this.info);
            if rc < 0 {
                return Err(errno_error(card, "allocate element info", rc));
            }
            alsa_sys::snd_ctl_elem_id_set_interface(this.id, alsa_sys::SND_CTL_ELEM_IFACE_CARD);
            alsa_sys::snd_ctl_elem_id_set_name(this.id, BOOT_NAME.as_ptr());
            alsa_sys::snd_ctl_elem_id_set_index(this.id, BOOT_ELEMENT_INDEX);
            alsa_sys::snd_ctl_elem_info_set_id(this.info, this.id);
        }
        Ok(this)
    }
}

impl Drop for RawBootInfo {
    fn drop(&mut self) {
        // SAFETY: pointers are either null or owned allocations.
        unsafe {
            if !self.info.is_null() {
                alsa_sys::snd_ctl_elem_info_free(self.info);
            }
            if !self.id.is_null() {
                alsa_sys::snd_ctl_elem_id_free(self.id);
            }
        }
    }
}

/// Element value buffer, freed on drop.
struct RawValue(*mut alsa_sys::snd_ctl_elem_value_t);

impl RawValue {
    fn new(card: i32) -> Result<Self> {
        let mut value = ptr::null_mut();
        // SAFETY: value is an out-pointer.
        let rc = unsafe { alsa_sys::snd_ctl_elem_value_malloc(&mut value) };
        if rc < 0 {
            return Err(errno_error(card, "allocate element value", rc));
        }
        Ok(Self(value))
    }
}

impl Drop for RawValue {
    fn drop(&mut self) {
        // SAFETY: allocated by snd_ctl_elem_value_malloc.
        unsafe { alsa_sys::snd_ctl_elem_value_free(self.0) }
    }
}

/// Event buffer, freed on drop.
struct RawEvent(*mut alsa_sys::snd_ctl_event_t);

impl RawEvent {
    fn new(card: i32) -> Result<Self> {
        let mut event = ptr::null_mut();
        // SAFETY: event is an out-pointer.
        let rc = unsafe { alsa_sys::snd_ctl_event_malloc(&mut event) };
        if rc < 0 {
            return Err(errno_error(card, "allocate event", rc));
        }
        Ok(Self(event))
    }
}

impl Drop for RawEvent {
    fn drop(&mut self) {
        // SAFETY: allocated by snd_ctl_event_malloc.
        unsafe { alsa_sys::snd_ctl_event_free(self.0) }
    }
}
