use crate::analysis::FrequencyBands;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Low,
    High,
}

/// One animated element driven by a band. `floor` keeps it moving a little
/// even during quiet passages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualElement {
    pub band: Band,
    pub gain: f32,
    pub floor: f32,
}

impl VisualElement {
    pub fn new(band: Band, gain: f32, floor: f32) -> Self {
        Self { band, gain, floor }
    }

    pub fn level(&self, bands: FrequencyBands) -> f32 {
        let value = match self.band {
            Band::Low => bands.low,
            Band::High => bands.high,
        };
        (value * self.gain).max(self.floor).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone)]
pub struct Visualizer {
    elements: Vec<VisualElement>,
}

impl Visualizer {
    pub fn new(elements: Vec<VisualElement>) -> Self {
        Self { elements }
    }

    /// Row of bars alternating bass and treble, louder toward the middle.
    pub fn bars(count: usize) -> Self {
        let center = count.saturating_sub(1) as f32 / 2.0;
        let elements = (0..count)
            .map(|idx| {
                let band = if idx % 2 == 0 { Band::Low } else { Band::High };
                let distance = if center > 0.0 {
                    ((idx as f32 - center).abs() / center).min(1.0)
                } else {
                    0.0
                };
                VisualElement::new(band, 1.4 - 0.6 * distance, 0.05)
            })
            .collect();
        Self::new(elements)
    }

    pub fn elements(&self) -> &[VisualElement] {
        &self.elements
    }

    pub fn levels(&self, bands: FrequencyBands) -> Vec<f32> {
        self.elements
            .iter()
            .map(|element| element.level(bands))
            .collect()
    }
}
