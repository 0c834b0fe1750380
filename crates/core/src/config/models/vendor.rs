use serde::{Deserialize, Serialize};

/// 供应商实现
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VendorKind {
    Http,
    /// 开发环境使用，接受所有发送
    Mock,
}

/// 短信供应商配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorConfig {
    pub kind: VendorKind,
    pub base_url: String,
    pub api_key: String,
    pub send_path: String,
    pub status_path: String,
    pub request_timeout_seconds: u64,
    pub mock_latency_ms: u64,
    /// 每个计费分段的单价，用于估算活动费用
    pub price_per_segment: f64,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            kind: VendorKind::Mock,
            base_url: "http://localhost:9000".to_string(),
            api_key: String::new(),
            send_path: "/messages".to_string(),
            status_path: "/messages/status".to_string(),
            request_timeout_seconds: 10,
            mock_latency_ms: 50,
            price_per_segment: 0.0075,
        }
    }
}

impl VendorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("供应商请求超时时间必须大于0"));
        }

        if !self.price_per_segment.is_finite() || self.price_per_segment < 0.0 {
            return Err(anyhow::anyhow!("分段单价不能为负数"));
        }

        if self.kind == VendorKind::Http {
            if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
                return Err(anyhow::anyhow!("供应商地址必须是HTTP或HTTPS URL"));
            }
            if self.api_key.is_empty() {
                return Err(anyhow::anyhow!("HTTP供应商必须配置API密钥"));
            }
        }

        if !self.send_path.starts_with('/') || !self.status_path.starts_with('/') {
            return Err(anyhow::anyhow!("供应商接口路径必须以 / 开头"));
        }

        Ok(())
    }
}

/// 短信分段参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SegmentationConfig {
    pub gsm7_single_limit: usize,
    pub gsm7_segment_limit: usize,
    pub ucs2_single_limit: usize,
    pub ucs2_segment_limit: usize,
    pub max_segments: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            gsm7_single_limit: 160,
            gsm7_segment_limit: 153,
            ucs2_single_limit: 70,
            ucs2_segment_limit: 67,
            max_segments: 255,
        }
    }
}

impl SegmentationConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.gsm7_segment_limit < 2 || self.gsm7_segment_limit > self.gsm7_single_limit {
            return Err(anyhow::anyhow!("GSM-7分段长度必须在2和单条长度之间"));
        }

        if self.ucs2_segment_limit < 2 || self.ucs2_segment_limit > self.ucs2_single_limit {
            return Err(anyhow::anyhow!("UCS-2分段长度必须在2和单条长度之间"));
        }

        if self.max_segments == 0 || self.max_segments > 255 {
            return Err(anyhow::anyhow!("最大分段数必须在1到255之间"));
        }

        Ok(())
    }
}
