//! tracing → 宿主调试日志。
//!
//! 进程里只有一个全局 subscriber，但插件可以反复 disable / enable（每次新的
//! bridge 和宿主句柄），所以 layer 转发给当前 attach 的宿主，而不是在 init 时固定。

use std::fmt::{self, Write};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LogConfig;
use crate::host::HostApi;

const LOG_PREFIX: &str = "[xplane-bridge]";

fn sink() -> &'static RwLock<Option<Arc<dyn HostApi>>> {
    static SINK: OnceLock<RwLock<Option<Arc<dyn HostApi>>>> = OnceLock::new();
    SINK.get_or_init(|| RwLock::new(None))
}

/// 日志转发到 `host`，直到调用 [`detach`]
pub fn attach(host: Arc<dyn HostApi>) {
    *sink().write().unwrap_or_else(PoisonError::into_inner) = Some(host);
}

pub fn detach() {
    sink().write().unwrap_or_else(PoisonError::into_inner).take();
}

/// 安装全局 subscriber。已经装过（插件重新 enable，或宿主进程有自己的
/// subscriber）时返回 `false`，第一次成功调用的过滤器继续生效。
pub fn init(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let layer = config.forward_to_host.then(HostLogLayer::new);
    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .is_ok()
}

/// 每个事件格式化成一行交给当前宿主
#[derive(Debug, Default)]
pub struct HostLogLayer;

impl HostLogLayer {
    pub fn new() -> Self {
        Self
    }
}

/// 把事件拼成一行：message 在前，其余字段以 ` key=value` 追加
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn into_body(mut self) -> String {
        self.message.push_str(&self.fields);
        self.message
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}

pub(crate) fn format_line(level: &tracing::Level, target: &str, body: &str) -> String {
    // 宿主日志不自动换行
    format!("{LOG_PREFIX} {:>5} {target}: {body}\n", level.to_string())
}

impl<S> Layer<S> for HostLogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let Some(host) = sink()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        else {
            return;
        };

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let meta = event.metadata();
        host.debug_string(&format_line(meta.level(), meta.target(), &visitor.into_body()));
    }
}
