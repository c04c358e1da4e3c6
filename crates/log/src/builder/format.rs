//! Format layer creation macros

/// Apply the shared display options to a format layer and box it.
///
/// Timer and writer choices change the layer's type, so each combination is
/// boxed separately.
macro_rules! boxed_fmt_layer {
    ($layer:expr, $config:expr) => {{
        let display = &$config.display;
        let layer = $layer
            .with_ansi(display.colors)
            .with_target(display.target)
            .with_file(display.source)
            .with_line_number(display.source);

        match (display.time, $config.test_writer) {
            (true, false) => layer.with_writer(std::io::stderr).boxed(),
            (true, true) => layer.with_test_writer().boxed(),
            (false, false) => layer.without_time().with_writer(std::io::stderr).boxed(),
            (false, true) => layer.without_time().with_test_writer().boxed(),
        }
    }};
}
