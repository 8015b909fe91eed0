use super::{count, CtPair, CtPinf, CtSmr};
use crate::{
    ctx::{PktCtx, PktError},
    hdr::*,
    tables::lock,
    xfi::Xfi,
};
use loxilb_common::CtDir;
use std::{fmt, mem::size_of, sync::Mutex};
use zerocopy::network_endian::U32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SctpState {
    #[default]
    Closed,
    Init,
    InitAck,
    /// Cookie echoed
    Cookie,
    Est,
    Shut,
    ShutAck,
    ShutComplete,
    Abort,
    Err,
}

impl SctpState {
    pub fn is_closing(&self) -> bool {
        matches!(
            self,
            Self::Shut | Self::ShutAck | Self::ShutComplete | Self::Abort | Self::Err
        )
    }

    fn smr(&self) -> CtSmr {
        match self {
            Self::Est => CtSmr::Est,
            Self::ShutComplete => CtSmr::Ctd,
            Self::Err => CtSmr::Err,
            Self::Shut | Self::ShutAck | Self::Abort => CtSmr::Fin,
            _ => CtSmr::InProg,
        }
    }
}

impl fmt::Display for SctpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Init => "init",
            Self::InitAck => "init-ack",
            Self::Cookie => "cookie-echo",
            Self::Est => "est",
            Self::Shut => "shutdown",
            Self::ShutAck => "shutdown-ack",
            Self::ShutComplete => "shutdown-complete",
            Self::Abort => "abort",
            Self::Err => "error",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SctpPinf {
    pub state: SctpState,
    /// Initiate tag of the initiator, the tag the responder must use
    pub itag: u32,
    /// Initiate tag of the responder
    pub otag: u32,
    pub cookie: u32,
    /// Direction that started the shutdown
    pub fndir: CtDir,
}

impl SctpPinf {
    /// Advances the state for the first chunk of a packet. `body` is the
    /// 32-bit word following the chunk header, the initiate tag or the
    /// cookie. Returns `None` when a chunk that needs the body is cut.
    pub fn step(
        &mut self,
        dir: CtDir,
        chunk_type: u8,
        vtag: u32,
        body: Option<u32>,
    ) -> Option<CtSmr> {
        self.state = self.next(dir, chunk_type, vtag, body)?;
        Some(self.state.smr())
    }

    fn next(&mut self, dir: CtDir, chunk_type: u8, vtag: u32, body: Option<u32>) -> Option<SctpState> {
        use SctpState::*;

        match chunk_type {
            SCTP_ERROR => return Some(Err),
            SCTP_SHUT => {
                self.fndir = dir;
                return Some(Shut);
            }
            SCTP_ABORT => return Some(Abort),
            _ => {}
        }

        let from_init = dir == CtDir::In;
        let state = match (self.state, chunk_type) {
            (Closed, SCTP_INIT_CHUNK) if from_init => {
                self.itag = body?;
                Init
            }
            (Init | InitAck, SCTP_INIT_CHUNK) if from_init => {
                self.itag = body?;
                self.otag = 0;
                Init
            }
            (Init, SCTP_INIT_CHUNK_ACK) if !from_init => {
                let tag = body?;
                if vtag != self.itag {
                    return Some(Err);
                }
                self.otag = tag;
                InitAck
            }
            (InitAck, SCTP_COOKIE_ECHO) if from_init => {
                let cookie = body?;
                if vtag != self.otag {
                    return Some(Err);
                }
                self.cookie = cookie;
                Cookie
            }
            (Cookie, SCTP_COOKIE_ACK) if !from_init && vtag == self.itag => Est,
            (Closed | Init | InitAck | Cookie, _) => Err,
            (Shut, SCTP_SHUT_ACK) if dir == self.fndir.reverse() => ShutAck,
            (Shut, SCTP_SHUT_ACK) => Err,
            (ShutAck, SCTP_SHUT_COMPLETE) if dir == self.fndir => ShutComplete,
            (ShutAck, SCTP_SHUT_COMPLETE) => Err,
            (state, _) => state,
        };
        Some(state)
    }
}

pub(super) fn sctp_sm(
    ctx: &PktCtx,
    xf: &Xfi,
    pair: &Mutex<CtPair>,
    dir: CtDir,
) -> Result<CtSmr, PktError> {
    let off = usize::from(xf.pm.l4_off);
    let s = ctx.read::<SctpHdr>(off)?;
    let coff = off + size_of::<SctpHdr>();
    let c = ctx.read::<SctpChunk>(coff)?;
    let boff = coff + size_of::<SctpChunk>();
    let body = ctx.read::<U32>(boff).ok().map(|b| b.get());

    let mut p = lock(pair);
    count(&mut p, xf, dir);
    if !matches!(p.pi, CtPinf::Sctp(_)) {
        p.pi = CtPinf::Sctp(SctpPinf::default());
    }
    let CtPinf::Sctp(ss) = &mut p.pi else {
        return Ok(CtSmr::Untracked);
    };
    ss.step(dir, c.chunk_type, s.vtag.get(), body)
        .ok_or(PktError::OutOfBounds {
            off: boff,
            len: size_of::<U32>(),
        })
}
