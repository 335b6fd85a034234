//! Clustering of overlapping raw detections.

use super::Region;

/// Merges raw multi-scale hits into one rectangle per object.
///
/// Hits are clustered by similarity (`eps` relative to their size), each cluster is averaged, and
/// clusters with `min_neighbors` or fewer members are dropped. Small clusters nested inside a
/// stronger one are suppressed as well. A `min_neighbors` of zero returns the hits untouched.
pub fn group_rectangles(rects: &[Region], min_neighbors: u32, eps: f64) -> Vec<Region> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let labels = partition(rects, |a, b| similar(a, b, eps));
    let classes = labels.iter().copied().max().map_or(0, |m| m + 1);

    let mut sums = vec![[0i64; 4]; classes];
    let mut counts = vec![0u32; classes];
    for (rect, &label) in rects.iter().zip(&labels) {
        let sum = &mut sums[label];
        sum[0] += i64::from(rect.x);
        sum[1] += i64::from(rect.y);
        sum[2] += i64::from(rect.width);
        sum[3] += i64::from(rect.height);
        counts[label] += 1;
    }

    let averaged: Vec<(Region, u32)> = sums
        .iter()
        .zip(&counts)
        .map(|(sum, &n)| {
            let s = 1.0 / f64::from(n);
            let avg = |v: i64| (v as f64 * s).round();
            (
                Region::new(
                    avg(sum[0]) as i32,
                    avg(sum[1]) as i32,
                    avg(sum[2]) as u32,
                    avg(sum[3]) as u32,
                ),
                n,
            )
        })
        .collect();

    averaged
        .iter()
        .enumerate()
        .filter(|(_, (_, n1))| *n1 > min_neighbors)
        .filter(|&(i, &(r1, n1))| {
            !averaged.iter().enumerate().any(|(j, &(r2, n2))| {
                if j == i || n2 <= min_neighbors {
                    return false;
                }
                let dx = (f64::from(r2.width) * eps).round() as i32;
                let dy = (f64::from(r2.height) * eps).round() as i32;
                r1.x >= r2.x - dx
                    && r1.y >= r2.y - dy
                    && r1.right() <= r2.right() + dx
                    && r1.bottom() <= r2.bottom() + dy
                    && (n2 > n1.max(3) || n1 < 3)
            })
        })
        .map(|(_, &(r, _))| r)
        .collect()
}

fn similar(a: &Region, b: &Region, eps: f64) -> bool {
    let delta = eps
        * (f64::from(a.width.min(b.width)) + f64::from(a.height.min(b.height)))
        * 0.5;
    let close = |p: i32, q: i32| f64::from((p - q).abs()) <= delta;
    close(a.x, b.x) && close(a.y, b.y) && close(a.right(), b.right()) && close(a.bottom(), b.bottom())
}

/// Labels equivalence classes of `items` under `same`, numbered from zero.
fn partition<T>(items: &[T], same: impl Fn(&T, &T) -> bool) -> Vec<usize> {
    let mut parent: Vec<usize> = (0..items.len()).collect();

    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..items.len() {
        for j in (i + 1)..items.len() {
            if same(&items[i], &items[j]) {
                let (ri, rj) = (root(&mut parent, i), root(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    let mut numbering = vec![usize::MAX; items.len()];
    let mut next = 0;
    (0..items.len())
        .map(|i| {
            let r = root(&mut parent, i);
            if numbering[r] == usize::MAX {
                numbering[r] = next;
                next += 1;
            }
            numbering[r]
        })
        .collect()
}
