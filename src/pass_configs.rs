#[derive(Default)]
pub struct GaussianBlurConfig {
    pub enabled: bool,
}

#[derive(Default)]
pub struct HistogramConfig {
    pub enabled: bool,
}

pub struct PostProcessConfig {
    pub exposure: f32,
    pub gamma: f32,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            exposure: 1.0,
            gamma: 2.2,
        }
    }
}

pub struct UploadConfig {
    pub enabled: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Per-frame settings handed to every producer.
#[derive(Default)]
pub struct PassConfigs {
    pub gaussian_blur: GaussianBlurConfig,
    pub histogram: HistogramConfig,
    pub post_process: PostProcessConfig,
    pub upload: UploadConfig,
}
