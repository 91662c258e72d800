//! Bus menu: lets a handset browse and edit the configuration bytes.
//!
//! Requests arrive on the menu class with `data[0] & 0xFC == REQ` and the
//! request byte in `data[4]`:
//!
//! ```text
//!  0x00        list      → ack with item count
//!  0x1n        item n    → title, text flag, editable flag   (8/8/4 bytes)
//!  0x3n        flags n   → max and current value, u64 BE     (8/8/8 bytes)
//!  0x40..0xFF  field     → item i, field n, both 1-based     (8/8/4 bytes)
//!              req = n | (i + 1) << 5
//! ```
//!
//! Replies to item and flags requests pause between the first and second
//! fragment until the handset acknowledges or the pacing timeout runs out.
//! A timeout is counted and the reply goes out anyway.
//!
//! Edits are a two-frame exchange: a response header naming the item,
//! then (for values longer than one frame) a response body carrying the
//! new byte in `data[2]`.

use embassy_time::Duration;
use log::{debug, info, warn};

use super::frame::BusFrame;
use super::ids::{DeviceType, menu_id};
use crate::app::ports::{BusActivity, BusPort};
use crate::config::{CONFIG_BYTES, Configuration};
use crate::diagnostics::ErrorCounters;
use crate::error::NonFatalError;

// ── Opcodes ──────────────────────────────────────────────────

const OP_MASK: u8 = 0xFC;
pub const OP_REQ: u8 = 0x04;
pub const OP_RESP_HEADER: u8 = 0x10;
pub const OP_RESP_BODY: u8 = 0x20;
pub const OP_RESP_ACK_HEADER: u8 = 0x30;

const REQ_MASK: u8 = 0xF0;
const NUMBER_MASK: u8 = 0x0F;
const REQ_ITEM: u8 = 0x10;
const REQ_FLAGS: u8 = 0x30;
/// Requests from here up address fields.
const REQ_FIELD_MIN: u8 = 0x40;
const FIELD_ITEM_SHIFT: u32 = 5;
/// `req >> FIELD_ITEM_SHIFT` of the first item.
const FIELD_ITEM_BASE: u8 = 2;

const REQ_IDX: usize = 4;
const SAVE_REQ_IDX: usize = 5;
const SAVE_VALUE_IDX: usize = 2;
/// Saves with a declared length above this continue in a body frame.
const MAX_SINGLE_FRAME_SAVE: u8 = 6;

const TEXT_LEN: usize = 10;
const MAGIC: [u8; 3] = [0x00, 0x62, 0x91];

// ── Menu table ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    /// Read-only text; the single field is the firmware commit.
    Commit,
    /// One byte of the packed configuration.
    ConfigByte(usize),
}

struct MenuItem {
    title: &'static str,
    kind: ItemKind,
}

const MENU_TABLE: [MenuItem; 5] = [
    MenuItem {
        title: "FW Commit",
        kind: ItemKind::Commit,
    },
    MenuItem {
        title: "Config 1",
        kind: ItemKind::ConfigByte(0),
    },
    MenuItem {
        title: "Config 2",
        kind: ItemKind::ConfigByte(1),
    },
    MenuItem {
        title: "Config 3",
        kind: ItemKind::ConfigByte(2),
    },
    MenuItem {
        title: "Config 4",
        kind: ItemKind::ConfigByte(3),
    },
];

pub const MENU_ITEM_COUNT: u8 = MENU_TABLE.len() as u8;

impl MenuItem {
    fn is_text(&self) -> bool {
        self.kind == ItemKind::Commit
    }

    fn editable(&self) -> bool {
        matches!(self.kind, ItemKind::ConfigByte(_))
    }

    fn field_count(&self) -> u8 {
        match self.kind {
            ItemKind::Commit => 1,
            ItemKind::ConfigByte(_) => 0,
        }
    }
}

/// Byte `n` of the configuration, requested over the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigEdit {
    pub byte: usize,
    pub value: u8,
}

/// What the menu needs to know about the device.
pub struct MenuContext<'a> {
    pub ours: DeviceType,
    pub config: &'a Configuration,
    pub commit: &'a str,
    pub pace_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingSave {
    peer: u8,
    item: u8,
}

/// Per-connection menu state.  Only the save exchange spans frames.
#[derive(Debug, Default)]
pub struct MenuHandler {
    pending_save: Option<PendingSave>,
}

impl MenuHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one menu-class frame.  Returns an edit for the caller to
    /// validate and persist.
    pub fn handle(
        &mut self,
        frame: &BusFrame,
        ctx: &MenuContext<'_>,
        io: &mut (impl BusPort + BusActivity),
        counters: &mut ErrorCounters,
    ) -> Option<ConfigEdit> {
        let peer = frame.source();
        match frame.byte(0) & OP_MASK {
            OP_REQ => {
                self.pending_save = None;
                self.handle_request(frame.byte(REQ_IDX), peer, ctx, io, counters);
                None
            }
            OP_RESP_HEADER => {
                let req = frame.byte(SAVE_REQ_IDX);
                let item = req & NUMBER_MASK;
                send(io, ack_save(ctx.ours, peer), counters);
                self.pending_save = (frame.byte(1) > MAX_SINGLE_FRAME_SAVE).then_some(PendingSave { peer, item });
                debug!("menu: save header for item {item}");
                None
            }
            OP_RESP_BODY => match self.pending_save.take() {
                Some(pending) if pending.peer == peer => {
                    let value = frame.byte(SAVE_VALUE_IDX);
                    info!("menu: value 0x{value:02x} for item {}", pending.item);
                    match MENU_TABLE.get(usize::from(pending.item)).map(|m| m.kind) {
                        Some(ItemKind::ConfigByte(byte)) if byte < CONFIG_BYTES => Some(ConfigEdit { byte, value }),
                        _ => {
                            counters.record(NonFatalError::Menu);
                            None
                        }
                    }
                }
                _ => None,
            },
            // Pacing acks from the handset; the activity adapter consumes them.
            OP_RESP_ACK_HEADER => None,
            op => {
                warn!("menu: unexpected op 0x{op:02x}");
                self.pending_save = None;
                None
            }
        }
    }

    fn handle_request(
        &mut self,
        req: u8,
        peer: u8,
        ctx: &MenuContext<'_>,
        io: &mut (impl BusPort + BusActivity),
        counters: &mut ErrorCounters,
    ) {
        let id = menu_id(ctx.ours, peer);
        if req == 0 {
            debug!("menu: ack");
            send(io, BusFrame::new(id, &[0x05, 0x00, 0x62, 0x91, 0x00, MENU_ITEM_COUNT]), counters);
            return;
        }

        let number = req & NUMBER_MASK;
        match req & REQ_MASK {
            REQ_ITEM => {
                let Some(item) = MENU_TABLE.get(usize::from(number)) else {
                    counters.record(NonFatalError::Menu);
                    return;
                };
                debug!("menu: item {number}");
                send_paced(item_frames(id, req, item), ctx, io, counters);
            }
            REQ_FLAGS => {
                let Some(item) = MENU_TABLE.get(usize::from(number)) else {
                    counters.record(NonFatalError::Menu);
                    return;
                };
                let (max, current) = match item.kind {
                    ItemKind::Commit => (1, u64::from(item.field_count())),
                    ItemKind::ConfigByte(n) => (0xFF, u64::from(ctx.config.byte(n))),
                };
                debug!("menu: flags {number} max={max} current={current}");
                send_paced(flags_frames(id, req, max, current), ctx, io, counters);
            }
            nibble if nibble >= REQ_FIELD_MIN => {
                let item_no = (nibble >> FIELD_ITEM_SHIFT) - FIELD_ITEM_BASE;
                let text = number
                    .checked_sub(1)
                    .and_then(|field| MENU_TABLE.get(usize::from(item_no)).filter(|item| field < item.field_count()))
                    .map(|item| match item.kind {
                        ItemKind::Commit => ctx.commit,
                        ItemKind::ConfigByte(_) => "",
                    });
                let Some(text) = text else {
                    counters.record(NonFatalError::Menu);
                    return;
                };
                debug!("menu: field {item_no}.{number}");
                for f in text_frames(id, req, text_bytes(text), [0, 0]) {
                    send(io, f, counters);
                }
            }
            _ => counters.record(NonFatalError::Menu),
        }
    }
}

fn send(io: &mut impl BusPort, frame: BusFrame, counters: &mut ErrorCounters) {
    if let Err(e) = io.send(&frame) {
        warn!("menu: tx failed ({e})");
        counters.record(NonFatalError::CanTx);
    }
}

/// First fragment, wait for the handset, then the rest.
fn send_paced(
    frames: [BusFrame; 3],
    ctx: &MenuContext<'_>,
    io: &mut (impl BusPort + BusActivity),
    counters: &mut ErrorCounters,
) {
    let [first, rest @ ..] = frames;
    send(io, first, counters);
    if !io.wait_for_activity(ctx.pace_timeout) {
        warn!("menu: no ack from handset within {} ms", ctx.pace_timeout.as_millis());
        counters.record(NonFatalError::MenuPacing);
    }
    for f in rest {
        send(io, f, counters);
    }
}

fn text_bytes(text: &str) -> [u8; TEXT_LEN] {
    let mut out = [0u8; TEXT_LEN];
    for (slot, b) in out.iter_mut().zip(text.bytes()) {
        *slot = b;
    }
    out
}

/// 10 bytes of text spread over an 8/8/4 reply; `tail` fills the last two.
fn text_frames(id: u32, req: u8, t: [u8; TEXT_LEN], tail: [u8; 2]) -> [BusFrame; 3] {
    [
        BusFrame::new(id, &[0x10, 0x10, MAGIC[0], MAGIC[1], MAGIC[2], req, t[0], t[1]]),
        BusFrame::new(id, &[0x21, t[2], t[3], t[4], t[5], t[6], t[7], t[8]]),
        BusFrame::new(id, &[0x22, t[9], tail[0], tail[1]]),
    ]
}

fn item_frames(id: u32, req: u8, item: &MenuItem) -> [BusFrame; 3] {
    text_frames(
        id,
        req,
        text_bytes(item.title),
        [u8::from(item.is_text()), u8::from(item.editable())],
    )
}

fn flags_frames(id: u32, req: u8, max: u64, current: u64) -> [BusFrame; 3] {
    let m = max.to_be_bytes();
    let c = current.to_be_bytes();
    [
        BusFrame::new(id, &[0x10, 0x14, MAGIC[0], MAGIC[1], MAGIC[2], req, m[0], m[1]]),
        BusFrame::new(id, &[0x21, m[2], m[3], m[4], m[5], m[6], m[7], c[0]]),
        BusFrame::new(id, &[0x22, c[1], c[2], c[3], c[4], c[5], c[6], c[7]]),
    ]
}

fn ack_save(ours: DeviceType, peer: u8) -> BusFrame {
    BusFrame::new(menu_id(ours, peer), &[0x30, 0x23, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
}
