//! Runs frames read as text through the dataplane. Each input line is
//! `<ifname or index> <hex frame>`, blank lines and lines starting with
//! `#` are skipped.

use crate::helpers::{if_name_or_default, ifindex, parse_hex};
use anyhow::anyhow;
use log::warn;
use loxilb_dp::{ktime_get_ns, process_at, Dataplane, PktCtx, Verdict};
use std::fmt::Write as _;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub frames: usize,
    pub errors: usize,
}

fn hex(data: &[u8]) -> String {
    data.iter().fold(String::new(), |mut s, b| {
        let _ = write!(s, "{:02x}", b);
        s
    })
}

fn verdict_str(v: Verdict) -> String {
    match v {
        Verdict::Drop => "drop".to_string(),
        Verdict::Pass => "pass".to_string(),
        Verdict::Redirect(oif) => format!("redirect {}", if_name_or_default(oif)),
        Verdict::Rewire(oif) => format!("rewire {}", if_name_or_default(oif)),
    }
}

/// Processes the frame of one input line at `now` (ns) and returns the
/// output line, `None` for the lines without a frame
pub fn replay_line(dp: &Dataplane, line: &str, now: u64) -> Result<Option<String>, anyhow::Error> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (ifname, frame) = line
        .split_once(char::is_whitespace)
        .ok_or(anyhow!("missing frame"))?;
    let mut ctx = PktCtx::new(ifindex(ifname)?, &parse_hex(frame)?);

    let v = process_at(dp, &mut ctx, now);
    let mut out = verdict_str(v);
    if v != Verdict::Drop {
        out += &format!(" {}", hex(ctx.data()));
    }
    if let Some(mif) = ctx.mirr_clone {
        out += &format!(" mirror {}", if_name_or_default(mif));
    }
    Ok(Some(out))
}

/// Replays all the lines of `input` and writes one result line per frame
pub async fn run<R, W>(dp: &Dataplane, input: R, mut output: W) -> Result<Summary, anyhow::Error>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut summary = Summary::default();
    let mut lines = input.lines();
    let mut lineno = 0;

    while let Some(line) = lines.next_line().await? {
        lineno += 1;
        match replay_line(dp, &line, ktime_get_ns()) {
            Ok(None) => {}
            Ok(Some(out)) => {
                summary.frames += 1;
                output.write_all(format!("{}\n", out).as_bytes()).await?;
            }
            Err(e) => {
                warn!("[replay] line {}: {}", lineno, e);
                summary.errors += 1;
            }
        }
    }
    output.flush().await?;

    Ok(summary)
}
