use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result, codes};

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_SO_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;
const DEFAULT_MAX_READS_PER_PASS: usize = 16;

/// 阻塞套接字通道的可调参数。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“建连超时”“有界阻塞读的超时”“单轮读取上限”等节流参数集中配置，避免调用方直接操作
///   `socket2` 或散落的常量；
/// - 读超时是协作式轮询的唯一节流手段：它决定一个空闲通道最多占用事件循环多久。
///
/// ## 体系定位（Architecture）
/// - 通道在构造时读取配置并立即把读超时落到套接字上，此后只读不写；
/// - 可从 TOML 片段加载（字段缺省时使用默认值），也可用 `with_*` 方法逐项覆写。
///
/// ## 契约说明（What）
/// - `connect_timeout_ms == 0` 表示不设超时，建连阻塞直到操作系统放弃；
/// - `so_timeout_ms` 必须大于 0：零读超时在套接字层意味着“无限阻塞”，会让事件循环失去控制权；
/// - `read_buffer_size`、`max_reads_per_pass` 必须大于 0；
/// - `allow_half_closure` 为真时，读到流结束只标记输入侧关闭，不关闭通道。
///
/// ## 设计取舍（Trade-offs）
/// - 序列化形式使用毫秒整数而非人类可读时长，换取零额外依赖与稳定的配置格式。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OioChannelConfig {
    connect_timeout_ms: u64,
    so_timeout_ms: u64,
    read_buffer_size: usize,
    max_reads_per_pass: usize,
    allow_half_closure: bool,
}

impl Default for OioChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            so_timeout_ms: DEFAULT_SO_TIMEOUT_MS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_reads_per_pass: DEFAULT_MAX_READS_PER_PASS,
            allow_half_closure: false,
        }
    }
}

impl OioChannelConfig {
    /// 创建默认配置。
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 TOML 文本加载并校验配置。
    ///
    /// ```rust
    /// use spark_channel::OioChannelConfig;
    ///
    /// let config = OioChannelConfig::from_toml_str("so_timeout_ms = 50\nallow_half_closure = true")
    ///     .expect("valid config");
    /// assert_eq!(config.so_timeout().as_millis(), 50);
    /// assert!(config.allow_half_closure());
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source).map_err(|err| {
            CoreError::new(codes::CONFIG_INVALID, "failed to parse channel config").with_cause(err)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 校验取值范围。
    pub fn validate(&self) -> Result<()> {
        if self.so_timeout_ms == 0 {
            return Err(invalid("so_timeout_ms must be greater than zero"));
        }
        if self.read_buffer_size == 0 {
            return Err(invalid("read_buffer_size must be greater than zero"));
        }
        if self.max_reads_per_pass == 0 {
            return Err(invalid("max_reads_per_pass must be greater than zero"));
        }
        Ok(())
    }

    /// 设置建连超时；`Duration::ZERO` 表示不设超时。
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = saturating_millis(timeout);
        self
    }

    /// 设置有界阻塞读的超时。
    pub fn with_so_timeout(mut self, timeout: Duration) -> Self {
        self.so_timeout_ms = saturating_millis(timeout);
        self
    }

    /// 设置单次读取预留的缓冲字节数。
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// 设置单轮读取的最大次数。
    pub fn with_max_reads_per_pass(mut self, reads: usize) -> Self {
        self.max_reads_per_pass = reads;
        self
    }

    /// 设置是否允许半关闭。
    pub fn with_allow_half_closure(mut self, allow: bool) -> Self {
        self.allow_half_closure = allow;
        self
    }

    /// 建连超时；`None` 表示不设超时。
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }

    /// 有界阻塞读的超时。
    pub fn so_timeout(&self) -> Duration {
        Duration::from_millis(self.so_timeout_ms)
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    pub fn max_reads_per_pass(&self) -> usize {
        self.max_reads_per_pass
    }

    pub fn allow_half_closure(&self) -> bool {
        self.allow_half_closure
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn invalid(message: &'static str) -> CoreError {
    CoreError::new(codes::CONFIG_INVALID, message)
}
