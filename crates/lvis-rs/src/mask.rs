//! COCO-compatible mask codec.
//!
//! Masks are column-major `u8` buffers: pixel `(x, y)` lives at `y + h * x`.
//! Polygon rasterization and the compressed string form follow `maskApi.c`
//! from cocoapi so areas and strings agree with pycocotools.

use crate::types::{Rle, Segmentation};

/// Encode a column-major binary mask of size `h * w` into RLE.
pub fn encode(mask: &[u8], h: u32, w: u32) -> Rle {
    let n = (h as usize) * (w as usize);
    debug_assert_eq!(mask.len(), n, "mask length must equal h*w");

    let mut counts = Vec::new();
    let mut run = 0u32;
    let mut current = false;
    for &px in &mask[..n.min(mask.len())] {
        let on = px != 0;
        if on != current {
            counts.push(run);
            run = 0;
            current = on;
        }
        run += 1;
    }
    counts.push(run);

    Rle { h, w, counts }
}

/// Decode an RLE into a column-major binary mask of size `h * w`.
pub fn decode(rle: &Rle) -> Vec<u8> {
    let n = (rle.h as usize) * (rle.w as usize);
    let mut mask = vec![0u8; n];
    let mut pos = 0usize;
    for (i, &c) in rle.counts.iter().enumerate() {
        let end = (pos + c as usize).min(n);
        if i % 2 == 1 {
            mask[pos..end].fill(1);
        }
        pos = end;
    }
    mask
}

/// Number of foreground pixels.
pub fn area(rle: &Rle) -> u64 {
    rle.counts.iter().skip(1).step_by(2).map(|&c| c as u64).sum()
}

/// Tight bounding box `[x, y, w, h]` of the foreground, `[0; 4]` when empty.
pub fn to_bbox(rle: &Rle) -> [f64; 4] {
    let h = rle.h as u64;
    // A trailing background run carries no extent information.
    let m = rle.counts.len() & !1;
    if m == 0 || h == 0 {
        return [0.0; 4];
    }

    let (mut xs, mut ys) = (rle.w as u64, h);
    let (mut xe, mut ye) = (0u64, 0u64);
    let mut run_start_x = 0u64;
    let mut cc = 0u64;
    for (j, &c) in rle.counts[..m].iter().enumerate() {
        cc += c as u64;
        let t = cc.saturating_sub((j % 2) as u64);
        let y = t % h;
        let x = t / h;
        if j % 2 == 0 {
            run_start_x = x;
        } else if run_start_x < x {
            // The run wraps into another column, so it spans full height.
            ys = 0;
            ye = h - 1;
        }
        xs = xs.min(x);
        xe = xe.max(x);
        ys = ys.min(y);
        ye = ye.max(y);
    }

    [
        xs as f64,
        ys as f64,
        (xe - xs + 1) as f64,
        (ye - ys + 1) as f64,
    ]
}

/// Area and bounding box in one call.
pub fn area_and_bbox(rle: &Rle) -> (u64, [f64; 4]) {
    (area(rle), to_bbox(rle))
}

/// Union of several RLEs sharing the same size.
pub fn merge(rles: &[Rle]) -> Rle {
    match rles {
        [] => Rle {
            h: 0,
            w: 0,
            counts: vec![0],
        },
        [only] => only.clone(),
        [first, rest @ ..] => rest.iter().fold(first.clone(), |acc, r| union(&acc, r)),
    }
}

/// Walks the runs of one RLE, skipping zero-length runs.
struct RunCursor<'a> {
    counts: &'a [u32],
    next: usize,
    left: u64,
    on: bool,
}

impl<'a> RunCursor<'a> {
    fn new(counts: &'a [u32]) -> Self {
        RunCursor {
            counts,
            next: 0,
            left: 0,
            on: false,
        }
    }

    fn refill(&mut self) -> bool {
        while self.left == 0 && self.next < self.counts.len() {
            self.left = self.counts[self.next] as u64;
            self.on = self.next % 2 == 1;
            self.next += 1;
        }
        self.left > 0
    }
}

fn union(a: &Rle, b: &Rle) -> Rle {
    let n = (a.h as u64) * (a.w as u64);
    let mut ca = RunCursor::new(&a.counts);
    let mut cb = RunCursor::new(&b.counts);
    let mut counts: Vec<u32> = Vec::new();
    let mut last: Option<bool> = None;
    let mut done = 0u64;

    while done < n {
        let step = match (ca.refill(), cb.refill()) {
            (true, true) => ca.left.min(cb.left),
            (true, false) => ca.left,
            (false, true) => cb.left,
            (false, false) => break,
        };
        let on = (ca.left > 0 && ca.on) || (cb.left > 0 && cb.on);

        if last == Some(on) {
            if let Some(tail) = counts.last_mut() {
                *tail += step as u32;
            }
        } else {
            if last.is_none() && on {
                counts.push(0);
            }
            counts.push(step as u32);
            last = Some(on);
        }

        ca.left = ca.left.saturating_sub(step);
        cb.left = cb.left.saturating_sub(step);
        done += step;
    }

    if counts.is_empty() {
        counts.push(n as u32);
    }
    Rle {
        h: a.h,
        w: a.w,
        counts,
    }
}

/// Rasterize one polygon `[x0, y0, x1, y1, ...]` into an RLE of size `h x w`.
pub fn fr_poly(xy: &[f64], h: u32, w: u32) -> Rle {
    let k = xy.len() / 2;
    if k < 3 {
        return Rle {
            h,
            w,
            counts: vec![h * w],
        };
    }

    let (u, v) = trace_upsampled_outline(xy, k);
    let crossings = column_crossings(&u, &v, h, w);
    Rle {
        h,
        w,
        counts: runs_from_crossings(crossings, h, w),
    }
}

const POLY_SCALE: f64 = 5.0;

/// Upsample the vertices and emit every integer point along each edge.
fn trace_upsampled_outline(xy: &[f64], k: usize) -> (Vec<i32>, Vec<i32>) {
    let mut xs: Vec<i32> = (0..k)
        .map(|j| (POLY_SCALE * xy[2 * j] + 0.5) as i32)
        .collect();
    let mut ys: Vec<i32> = (0..k)
        .map(|j| (POLY_SCALE * xy[2 * j + 1] + 0.5) as i32)
        .collect();
    xs.push(xs[0]);
    ys.push(ys[0]);

    let mut u = Vec::new();
    let mut v = Vec::new();
    for j in 0..k {
        let (mut x0, mut x1, mut y0, mut y1) = (xs[j], xs[j + 1], ys[j], ys[j + 1]);
        let dx = (x1 - x0).abs();
        let dy = (y0 - y1).abs();
        let flip = (dx >= dy && x0 > x1) || (dx < dy && y0 > y1);
        if flip {
            std::mem::swap(&mut x0, &mut x1);
            std::mem::swap(&mut y0, &mut y1);
        }

        if dx >= dy {
            let slope = if dx == 0 {
                0.0
            } else {
                (y1 - y0) as f64 / dx as f64
            };
            for d in 0..=dx {
                let t = if flip { dx - d } else { d };
                u.push(t + x0);
                v.push((y0 as f64 + slope * t as f64 + 0.5) as i32);
            }
        } else {
            let slope = (x1 - x0) as f64 / dy as f64;
            for d in 0..=dy {
                let t = if flip { dy - d } else { d };
                v.push(t + y0);
                u.push((x0 as f64 + slope * t as f64 + 0.5) as i32);
            }
        }
    }
    (u, v)
}

/// Downsample the outline to the points where it crosses a pixel column,
/// returned as column-major linear offsets.
fn column_crossings(u: &[i32], v: &[i32], h: u32, w: u32) -> Vec<u32> {
    let mut offsets = Vec::new();
    for j in 1..u.len() {
        if u[j] == u[j - 1] {
            continue;
        }
        let xd_raw = if u[j] < u[j - 1] { u[j] } else { u[j] - 1 };
        let xd = (xd_raw as f64 + 0.5) / POLY_SCALE - 0.5;
        if xd.floor() != xd || xd < 0.0 || xd > (w as f64 - 1.0) {
            continue;
        }
        let yd_raw = v[j].min(v[j - 1]);
        let yd = ((yd_raw as f64 + 0.5) / POLY_SCALE - 0.5)
            .clamp(0.0, h as f64)
            .ceil();
        offsets.push(xd as u32 * h + yd as u32);
    }
    offsets
}

/// Turn sorted crossing offsets into alternating run lengths.
fn runs_from_crossings(mut offsets: Vec<u32>, h: u32, w: u32) -> Vec<u32> {
    offsets.push(h * w);
    offsets.sort_unstable();

    let mut prev = 0u32;
    let deltas: Vec<u32> = offsets
        .into_iter()
        .map(|o| {
            let d = o - prev;
            prev = o;
            d
        })
        .collect();

    // A zero delta means two crossings cancel; fold the following run into
    // the previous one.
    let mut counts = Vec::with_capacity(deltas.len());
    let mut it = deltas.into_iter();
    if let Some(first) = it.next() {
        counts.push(first);
    }
    while let Some(d) = it.next() {
        if d > 0 {
            counts.push(d);
        } else if let Some(next) = it.next() {
            if let Some(tail) = counts.last_mut() {
                *tail += next;
            }
        }
    }
    counts
}

/// Rasterize every part of a multi-part polygon and merge them into one mask.
pub fn fr_polys(polygons: &[Vec<f64>], h: u32, w: u32) -> Rle {
    if polygons.is_empty() {
        return Rle {
            h,
            w,
            counts: vec![h * w],
        };
    }
    let parts: Vec<Rle> = polygons.iter().map(|p| fr_poly(p, h, w)).collect();
    merge(&parts)
}

/// Convert any segmentation form into an RLE. Polygons are rasterized at
/// `h x w`; RLE forms carry their own size.
pub fn segm_to_rle(segm: &Segmentation, h: u32, w: u32) -> Rle {
    match segm {
        Segmentation::Polygon(parts) => fr_polys(parts, h, w),
        Segmentation::CompressedRle { size, counts } => rle_from_string(counts, size[0], size[1]),
        Segmentation::UncompressedRle { size, counts } => Rle {
            h: size[0],
            w: size[1],
            counts: counts.clone(),
        },
    }
}

/// Compress an RLE into the COCO string form.
///
/// Counts past the third are stored as the difference to the count two
/// positions back, then written as 5-bit groups offset by 48.
pub fn rle_to_string(rle: &Rle) -> String {
    let mut s = String::new();
    for (i, &c) in rle.counts.iter().enumerate() {
        let mut x = c as i64;
        if i > 2 {
            x -= rle.counts[i - 2] as i64;
        }
        loop {
            let mut group = (x & 0x1f) as u8;
            x >>= 5;
            let more = if group & 0x10 != 0 { x != -1 } else { x != 0 };
            if more {
                group |= 0x20;
            }
            s.push((group + 48) as char);
            if !more {
                break;
            }
        }
    }
    s
}

/// Parse the COCO string form back into an RLE of size `h x w`.
pub fn rle_from_string(s: &str, h: u32, w: u32) -> Rle {
    let bytes = s.as_bytes();
    let mut counts: Vec<u32> = Vec::new();
    let mut p = 0usize;

    while p < bytes.len() {
        let mut x: i64 = 0;
        let mut k = 0u32;
        let mut more = true;
        while more && p < bytes.len() {
            let c = bytes[p].wrapping_sub(48) as i64;
            x |= (c & 0x1f).wrapping_shl(5 * k);
            more = c & 0x20 != 0;
            p += 1;
            k += 1;
            if !more && c & 0x10 != 0 {
                x |= (-1i64).wrapping_shl(5 * k);
            }
        }
        if counts.len() > 2 {
            x += counts[counts.len() - 2] as i64;
        }
        counts.push(x as u32);
    }

    Rle { h, w, counts }
}
