//! Async consumption through `SampleStream`

mod helpers;

use futures::StreamExt;
use rtlstream::replay::{ReplayConfig, ReplayDriver};
use rtlstream::sim::SimDriver;
use rtlstream::{DeviceRegistry, DeviceSelector, Error, Session};

#[tokio::test]
async fn test_sample_stream_yields_complex_blocks() {
    let driver = SimDriver::new(1);
    let sim = driver.device(0).unwrap();
    let registry = DeviceRegistry::new(driver);
    let mut session = Session::open(&registry, &DeviceSelector::Index(0)).unwrap();
    session.start(512, 2).unwrap();
    let mut stream = session.sample_stream().unwrap();

    let dc = helpers::generate_dc_signal_cu8(256, 1.0, 1.0);
    for _ in 0..3 {
        assert!(sim.complete_next(&dc));
        let block = stream.next().await.expect("block").expect("samples");
        assert_eq!(block.len(), 256);
        assert!(block.iter().all(|s| s.re > 0.99 && s.im > 0.99));
    }

    session.stop().unwrap();
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_sample_stream_reports_end_of_capture() {
    let tone = helpers::generate_sine_wave_cu8(1_000.0, 48_000, 512);
    let path = helpers::write_capture("stream.cu8", &tone);
    let registry = DeviceRegistry::new(ReplayDriver::new(ReplayConfig::new(&path)));
    let mut session = Session::open(&registry, &DeviceSelector::Index(0)).unwrap();
    session.start(512, 1).unwrap();

    let mut stream = session.sample_stream().unwrap();
    let mut blocks = 0;
    let mut fault = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(block) => {
                assert_eq!(block.len(), 256);
                blocks += 1;
            }
            Err(e) => fault = Some(e),
        }
    }
    assert_eq!(blocks, 2);
    assert!(matches!(fault, Some(Error::DeviceDisconnected(_))));

    session.close().unwrap();
    std::fs::remove_file(path).ok();
}
