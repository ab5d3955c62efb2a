use image::GrayImage;

/// Straight piece of an edge chain in processing coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub p0: [f64; 2],
    pub p1: [f64; 2],
    /// Edge pixels that produced the segment
    pub pixels: usize,
}

impl Segment {
    pub fn new(p0: [f64; 2], p1: [f64; 2]) -> Self {
        Self { p0, p1, pixels: 0 }
    }

    pub fn dx(&self) -> f64 {
        self.p1[0] - self.p0[0]
    }

    pub fn dy(&self) -> f64 {
        self.p1[1] - self.p0[1]
    }

    /// Vertical extent at least `ratio` times the horizontal extent.
    /// Crosswalk stripes and other flat artifacts fail this.
    pub fn is_near_vertical(&self, ratio: f64) -> bool {
        let dy = self.dy().abs();
        dy > 0.0 && dy >= self.dx().abs() * ratio
    }

    /// x of the segment's supporting line at row `y`.
    pub fn x_at(&self, y: f64) -> f64 {
        let k = self.dx() / self.dy();
        self.p0[0] + k * (y - self.p0[1])
    }
}

/// Running moments of one edge chain.
struct ChainMoments {
    count: usize,
    sum_x: f64,
    sum_y: f64,
    sum_xx: f64,
    sum_yy: f64,
    sum_xy: f64,
}

impl ChainMoments {
    fn new() -> Self {
        Self {
            count: 0,
            sum_x: 0.0,
            sum_y: 0.0,
            sum_xx: 0.0,
            sum_yy: 0.0,
            sum_xy: 0.0,
        }
    }

    fn push(&mut self, x: f64, y: f64) {
        self.count += 1;
        self.sum_x += x;
        self.sum_y += y;
        self.sum_xx += x * x;
        self.sum_yy += y * y;
        self.sum_xy += x * y;
    }

    fn mean(&self) -> [f64; 2] {
        let n = self.count as f64;
        [self.sum_x / n, self.sum_y / n]
    }

    /// Unit vector of the principal axis.
    fn direction(&self) -> [f64; 2] {
        let n = self.count as f64;
        let [mx, my] = self.mean();
        let cxx = self.sum_xx / n - mx * mx;
        let cyy = self.sum_yy / n - my * my;
        let cxy = self.sum_xy / n - mx * my;
        let theta = 0.5 * (2.0 * cxy).atan2(cxx - cyy);
        [theta.cos(), theta.sin()]
    }
}

/// Splits a binary edge map into 8-connected chains and fits one segment per
/// chain along its principal axis. Buffers are reused between calls.
pub struct SegmentExtractor {
    min_pixels: usize,
    visited: Vec<bool>,
    stack: Vec<usize>,
    chain: Vec<usize>,
}

impl SegmentExtractor {
    pub fn new(min_pixels: usize) -> Self {
        Self {
            min_pixels: min_pixels.max(2),
            visited: Vec::new(),
            stack: Vec::new(),
            chain: Vec::new(),
        }
    }

    /// Replace the contents of `out` with the segments found in `edges`.
    pub fn extract(&mut self, edges: &GrayImage, out: &mut Vec<Segment>) {
        out.clear();
        let (w, h) = edges.dimensions();
        let w = w as usize;
        let h = h as usize;
        let data = edges.as_raw();

        self.visited.clear();
        self.visited.resize(w * h, false);

        for start in 0..data.len() {
            if data[start] == 0 || self.visited[start] {
                continue;
            }

            self.chain.clear();
            self.stack.clear();
            self.stack.push(start);
            self.visited[start] = true;

            while let Some(i) = self.stack.pop() {
                self.chain.push(i);
                let x = i % w;
                let y = i / w;
                for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                    for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                        let j = ny * w + nx;
                        if data[j] != 0 && !self.visited[j] {
                            self.visited[j] = true;
                            self.stack.push(j);
                        }
                    }
                }
            }

            if self.chain.len() < self.min_pixels {
                continue;
            }
            out.push(self.fit_chain(w));
        }
    }

    fn fit_chain(&self, w: usize) -> Segment {
        let mut moments = ChainMoments::new();
        for &i in &self.chain {
            moments.push((i % w) as f64, (i / w) as f64);
        }

        let center = moments.mean();
        let dir = moments.direction();
        let (mut t_min, mut t_max) = (f64::INFINITY, f64::NEG_INFINITY);
        for &i in &self.chain {
            let px = (i % w) as f64 - center[0];
            let py = (i / w) as f64 - center[1];
            let t = px * dir[0] + py * dir[1];
            t_min = t_min.min(t);
            t_max = t_max.max(t);
        }

        Segment {
            p0: [center[0] + dir[0] * t_min, center[1] + dir[1] * t_min],
            p1: [center[0] + dir[0] * t_max, center[1] + dir[1] * t_max],
            pixels: self.chain.len(),
        }
    }
}
