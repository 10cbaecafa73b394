use rgb::RGB8;

use super::frame::FrameType;

/// Colour of nodes that barely changed between baseline and comparison.
pub const NEUTRAL: RGB8 = RGB8 { r: 200, g: 200, b: 200 };

/// Shades for nodes that grew, from unchanged to extreme growth.
pub const RED_RAMP: [RGB8; 5] = [
    NEUTRAL,
    RGB8 { r: 250, g: 200, b: 200 },
    RGB8 { r: 245, g: 150, b: 150 },
    RGB8 { r: 235, g: 95, b: 95 },
    RGB8 { r: 215, g: 35, b: 35 },
];

/// Shades for nodes that shrank, from unchanged to extreme shrinkage.
pub const GREEN_RAMP: [RGB8; 5] = [
    NEUTRAL,
    RGB8 { r: 200, g: 245, b: 200 },
    RGB8 { r: 150, g: 230, b: 150 },
    RGB8 { r: 95, g: 205, b: 95 },
    RGB8 { r: 35, g: 165, b: 35 },
];

/// Colour of every node of a removed subtree.
pub const REMOVED: RGB8 = GREEN_RAMP[4];

/// Colour of every node of an added subtree.
pub const ADDED: RGB8 = RED_RAMP[4];

/// Upper bounds of the relative-change bands; anything above the last is extreme.
const BANDS: [f64; 4] = [0.02, 0.10, 0.40, 0.80];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BasicPalette {
    Hot,
    Mem,
    Red,
    Green,
    Blue,
    Aqua,
    Yellow,
    Purple,
    Orange,
    Gray,
}

impl BasicPalette {
    fn for_frame(frame_type: FrameType) -> Self {
        match frame_type {
            FrameType::JitCompiled => BasicPalette::Green,
            FrameType::Inlined => BasicPalette::Aqua,
            FrameType::Interpreted => BasicPalette::Orange,
            FrameType::C1Compiled => BasicPalette::Purple,
            FrameType::Native => BasicPalette::Red,
            FrameType::Cpp => BasicPalette::Yellow,
            FrameType::Kernel => BasicPalette::Hot,
            FrameType::ThreadName => BasicPalette::Gray,
            FrameType::AllocatedObject
            | FrameType::AllocatedObjectInNewTlab
            | FrameType::AllocatedObjectOutsideTlab => BasicPalette::Blue,
            FrameType::BlockingObject => BasicPalette::Mem,
        }
    }
}

/// Generate a vector hash for the name string, weighting early over
/// later characters. We want to pick the same colors for function
/// names across different flame graphs.
fn namehash<I: Iterator<Item = u8>>(name: I) -> f32 {
    let mut vector = 0.0;
    let mut weight = 1.0;
    let mut max = 1.0;
    let mut modulo = 10;

    // only the first three characters contribute
    for character in name.take(3) {
        let i = f32::from(character % modulo);
        vector += (i / f32::from(modulo - 1)) * weight;
        modulo += 1;
        max += weight;
        weight *= 0.70;
    }

    1.0 - vector / max
}

macro_rules! t {
    ($b:expr, $a:expr, $x:expr) => {
        $b + ($a as f32 * $x) as u8
    };
}

fn rgb_components(palette: BasicPalette, v1: f32, v2: f32, v3: f32) -> RGB8 {
    let (r, g, b) = match palette {
        BasicPalette::Hot => (t!(205, 50, v3), t!(0, 230, v1), t!(0, 55, v2)),
        BasicPalette::Mem => (t!(0, 0, v3), t!(190, 50, v2), t!(0, 210, v1)),
        BasicPalette::Red => (t!(200, 55, v1), t!(50, 80, v1), t!(50, 80, v1)),
        BasicPalette::Green => (t!(50, 60, v1), t!(200, 55, v1), t!(50, 60, v1)),
        BasicPalette::Blue => (t!(80, 60, v1), t!(80, 60, v1), t!(205, 50, v1)),
        BasicPalette::Yellow => (t!(175, 55, v1), t!(175, 55, v1), t!(50, 20, v1)),
        BasicPalette::Purple => (t!(190, 65, v1), t!(80, 60, v1), t!(190, 65, v1)),
        BasicPalette::Aqua => (t!(50, 60, v1), t!(165, 55, v1), t!(165, 55, v1)),
        BasicPalette::Orange => (t!(190, 65, v1), t!(90, 65, v1), t!(0, 0, v1)),
        BasicPalette::Gray => (t!(160, 40, v1), t!(160, 40, v1), t!(160, 40, v1)),
    };
    RGB8::new(r, g, b)
}

/// Colour of a frame-tree node: the palette follows the frame type, the shade follows the name
/// so that a method keeps its colour across graphs.
pub fn frame_color(frame_type: FrameType, name: &str) -> RGB8 {
    let name_hash = namehash(name.bytes());
    let reverse_name_hash = namehash(name.bytes().rev());
    rgb_components(
        BasicPalette::for_frame(frame_type),
        name_hash,
        reverse_name_hash,
        reverse_name_hash,
    )
}

/// Colour of a node present on both sides, from its (possibly normalized) baseline and
/// comparison totals.
pub fn diff_color(baseline: f64, comparison: f64) -> RGB8 {
    let sum = baseline + comparison;
    if sum <= 0.0 {
        return NEUTRAL;
    }
    let ratio = (baseline - comparison).abs() / sum;
    let band = BANDS
        .iter()
        .position(|&bound| ratio <= bound)
        .unwrap_or(BANDS.len());
    if comparison > baseline {
        RED_RAMP[band]
    } else if baseline > comparison {
        GREEN_RAMP[band]
    } else {
        NEUTRAL
    }
}

/// Renders a colour the way SVG and CSS expect it.
pub fn css(color: RGB8) -> String {
    format!("rgb({},{},{})", color.r, color.g, color.b)
}
