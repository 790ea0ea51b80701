use ndarray::{Array2, ArrayViewMut2};

use crate::annotation::{Point, MIN_CONTOUR_POINTS};

/// Column spans `[start, end)` of row `y` that lie inside `contour`.
///
/// Pixel `(x, y)` is inside when a ray from its centre crosses the ring an odd
/// number of times. An edge counts for row `y` when exactly one of its endpoints
/// lies strictly below the row, so shared vertices are counted once.
fn row_spans(contour: &[Point], y: f64) -> Vec<(f64, f64)> {
    let mut crossings = Vec::new();
    let mut j = contour.len() - 1;
    for i in 0..contour.len() {
        let (xi, yi) = (contour[i].x() as f64, contour[i].y() as f64);
        let (xj, yj) = (contour[j].x() as f64, contour[j].y() as f64);
        if (yi > y) != (yj > y) {
            crossings.push(xi + (y - yi) * (xj - xi) / (yj - yi));
        }
        j = i;
    }
    crossings.sort_by(|a, b| a.total_cmp(b));
    crossings
        .chunks_exact(2)
        .map(|pair| (pair[0], pair[1]))
        .collect()
}

/// Set every pixel of `canvas` inside `contour` to 1. Vertices outside the canvas
/// are allowed; the fill is clipped. Returns the number of pixels that changed.
pub fn fill_polygon(canvas: &mut ArrayViewMut2<u8>, contour: &[Point]) -> usize {
    let (rows, columns) = canvas.dim();
    if contour.len() < MIN_CONTOUR_POINTS || rows == 0 || columns == 0 {
        return 0;
    }

    let y_min = contour.iter().map(Point::y).min().unwrap_or(0).max(0) as usize;
    let y_max = contour.iter().map(Point::y).max().unwrap_or(-1);
    if y_max < 0 {
        return 0;
    }
    let y_max = (y_max as usize).min(rows - 1);

    let mut changed = 0;
    for y in y_min..=y_max {
        for (start, end) in row_spans(contour, y as f64) {
            let first = start.ceil().max(0.0);
            let last = (end.ceil() - 1.0).min((columns - 1) as f64);
            if first > last {
                continue;
            }
            for x in first as usize..=last as usize {
                let pixel = &mut canvas[[y, x]];
                if *pixel == 0 {
                    *pixel = 1;
                    changed += 1;
                }
            }
        }
    }
    changed
}

/// Binary raster of `contour` on a zeroed `(rows, columns)` canvas.
pub fn rasterize_polygon(contour: &[Point], shape: (usize, usize)) -> Array2<u8> {
    let mut canvas = Array2::<u8>::zeros(shape);
    fill_polygon(&mut canvas.view_mut(), contour);
    canvas
}
