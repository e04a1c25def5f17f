/// 为一个 [`Plugin`](crate::plugin::Plugin) 导出五个 `XPlugin*` 入口。
///
/// ```ignore
/// xplane_bridge::xplane_plugin!(HelloPlugin, HelloPlugin::default());
/// ```
///
/// runtime 放在首次使用时创建的进程级 mutex 里，每个入口都先加锁，宿主的生命周期调用不会重叠。
#[cfg(feature = "xplm")]
#[macro_export]
macro_rules! xplane_plugin {
    ($plugin:ty, $init:expr) => {
        fn __xplane_bridge_runtime(
        ) -> ::std::sync::MutexGuard<'static, $crate::plugin::PluginRuntime<$plugin>> {
            static RUNTIME: ::std::sync::OnceLock<
                ::std::sync::Mutex<$crate::plugin::PluginRuntime<$plugin>>,
            > = ::std::sync::OnceLock::new();
            RUNTIME
                .get_or_init(|| {
                    ::std::sync::Mutex::new($crate::plugin::PluginRuntime::new(
                        $init,
                        ::std::sync::Arc::new($crate::host::XplmHost::new()),
                    ))
                })
                .lock()
                .unwrap_or_else(::std::sync::PoisonError::into_inner)
        }

        /// # Safety
        /// 宿主传入三个 256 字节的缓冲区
        #[no_mangle]
        pub unsafe extern "C" fn XPluginStart(
            out_name: *mut ::std::os::raw::c_char,
            out_sig: *mut ::std::os::raw::c_char,
            out_desc: *mut ::std::os::raw::c_char,
        ) -> ::std::os::raw::c_int {
            __xplane_bridge_runtime().start_into(out_name, out_sig, out_desc)
        }

        #[no_mangle]
        pub extern "C" fn XPluginStop() {
            __xplane_bridge_runtime().stop();
        }

        #[no_mangle]
        pub extern "C" fn XPluginEnable() -> ::std::os::raw::c_int {
            ::std::os::raw::c_int::from(__xplane_bridge_runtime().enable().is_ok())
        }

        #[no_mangle]
        pub extern "C" fn XPluginDisable() {
            __xplane_bridge_runtime().disable();
        }

        #[no_mangle]
        pub extern "C" fn XPluginReceiveMessage(
            from: ::std::os::raw::c_int,
            message: ::std::os::raw::c_int,
            param: *mut ::std::ffi::c_void,
        ) {
            __xplane_bridge_runtime().receive_message(from, message, param);
        }
    };
}
