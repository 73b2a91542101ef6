//! Integration tests for device selection and the acquisition chain
//!
//! Covers:
//! - Index-based selection among identical controllers
//! - Rollback of partially acquired resources at every failing step
//! - Teardown order on close and drop

use common::NullSink;
use common::test_utils::RecordingSink;
use driver::testing::{Event, FailAt, MockBackend, MockDevice};
use driver::{ConnectOptions, Controller, DriverError, STREAM_DEPTH, TransportError};
use std::sync::Arc;

fn two_controllers() -> MockBackend {
    MockBackend::new(vec![
        MockDevice::other(0x046D, 0xC52B, 2),
        MockDevice::controller(5),
        MockDevice::other(0x1D6B, 0x0002, 1),
        MockDevice::controller(9),
    ])
}

fn idle_options(index: usize) -> ConnectOptions {
    ConnectOptions {
        index,
        start_reader: false,
        ..ConnectOptions::default()
    }
}

mod locate {
    use super::*;

    #[test]
    fn test_index_selects_among_matches() {
        let backend = two_controllers();

        let first = Controller::connect_with(&backend, Arc::new(NullSink), idle_options(0)).unwrap();
        drop(first);
        let second =
            Controller::connect_with(&backend, Arc::new(NullSink), idle_options(1)).unwrap();
        drop(second);

        assert_eq!(backend.opened_devices(), vec![5, 9]);
    }

    #[test]
    fn test_index_past_matches_is_not_found() {
        let backend = two_controllers();

        let err = Controller::connect_with(&backend, Arc::new(NullSink), idle_options(2))
            .unwrap_err();

        match err {
            DriverError::NotFound { index, found, .. } => {
                assert_eq!(index, 2);
                assert_eq!(found, 2);
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
        assert!(backend.opened_devices().is_empty());
        assert_eq!(backend.releases(), vec![Event::ContextClosed]);
    }

    #[test]
    fn test_only_selected_device_is_opened() {
        let backend = two_controllers();

        let controller =
            Controller::connect_with(&backend, Arc::new(NullSink), idle_options(1)).unwrap();

        assert_eq!(backend.opened_devices(), vec![9]);
        controller.close();
    }

    #[test]
    fn test_unopenable_device_is_access_error() {
        let backend = MockBackend::new(vec![MockDevice::controller(4).unopenable()]);

        let err = Controller::connect_with(&backend, Arc::new(NullSink), idle_options(0))
            .unwrap_err();

        assert!(matches!(
            err,
            DriverError::Access {
                index: 0,
                source: TransportError::Access
            }
        ));
        assert_eq!(backend.releases(), vec![Event::ContextClosed]);
    }

    #[test]
    fn test_selection_is_reported_to_sink() {
        let backend = two_controllers();
        let sink = RecordingSink::all();

        let controller = Controller::connect_with(&backend, sink.clone(), idle_options(1)).unwrap();

        assert!(sink.contains("at wrong index 0"));
        assert!(sink.contains("found and selected usb device 0c45:7100 (bus 1 address 9)"));
        assert!(sink.contains("found other usb device 046d:c52b"));
        controller.close();
    }
}

mod rollback {
    use super::*;

    #[test]
    fn test_context_failure_acquires_nothing() {
        let backend = MockBackend::new(vec![MockDevice::controller(1)]);
        backend.fail_at(FailAt::Context, TransportError::NoMem);

        let err = Controller::connect_with(&backend, Arc::new(NullSink), idle_options(0))
            .unwrap_err();

        assert!(matches!(err, DriverError::Context(TransportError::NoMem)));
        assert!(backend.events().is_empty());
    }

    #[test]
    fn test_enumeration_failure_closes_context() {
        let backend = MockBackend::new(vec![MockDevice::controller(1)]);
        backend.fail_at(FailAt::Enumerate, TransportError::Io);

        let err = Controller::connect_with(&backend, Arc::new(NullSink), idle_options(0))
            .unwrap_err();

        assert!(matches!(err, DriverError::Context(TransportError::Io)));
        assert_eq!(backend.releases(), vec![Event::ContextClosed]);
    }

    #[test]
    fn test_missing_endpoint_closes_device_and_context() {
        let backend = MockBackend::new(vec![MockDevice::controller(3).without_in_endpoint()]);

        let err = Controller::connect_with(&backend, Arc::new(NullSink), idle_options(0))
            .unwrap_err();

        assert!(matches!(err, DriverError::NoEndpoint { interface: 0 }));
        assert_eq!(
            backend.releases(),
            vec![
                Event::InterfaceReleased(0),
                Event::DeviceClosed { address: 3 },
                Event::ContextClosed,
            ]
        );
    }

    #[test]
    fn test_missing_interface_is_no_interface() {
        let backend = MockBackend::new(vec![MockDevice::controller(3).without_interface()]);

        let err = Controller::connect_with(&backend, Arc::new(NullSink), idle_options(0))
            .unwrap_err();

        assert!(matches!(err, DriverError::NoInterface(_)));
        assert_eq!(
            backend.releases(),
            vec![Event::DeviceClosed { address: 3 }, Event::ContextClosed]
        );
    }

    #[test]
    fn test_claim_failure_is_no_interface() {
        let backend = MockBackend::new(vec![MockDevice::controller(3)]);
        backend.fail_at(FailAt::Claim, TransportError::Busy);

        let err = Controller::connect_with(&backend, Arc::new(NullSink), idle_options(0))
            .unwrap_err();

        match err {
            DriverError::NoInterface(message) => assert!(message.contains("Resource busy")),
            other => panic!("expected NoInterface, got {:?}", other),
        }
        assert!(!backend.events().contains(&Event::InterfaceReleased(0)));
        assert_eq!(
            backend.releases(),
            vec![Event::DeviceClosed { address: 3 }, Event::ContextClosed]
        );
    }

    #[test]
    fn test_stream_failure_releases_interface() {
        let backend = MockBackend::new(vec![MockDevice::controller(3)]);
        backend.fail_at(FailAt::StreamOpen, TransportError::Pipe);

        let err = Controller::connect_with(&backend, Arc::new(NullSink), ConnectOptions::default())
            .unwrap_err();

        assert!(matches!(err, DriverError::StreamOpen(TransportError::Pipe)));
        assert_eq!(
            backend.releases(),
            vec![
                Event::InterfaceReleased(0),
                Event::DeviceClosed { address: 3 },
                Event::ContextClosed,
            ]
        );
    }

    #[test]
    fn test_auto_detach_not_supported_is_tolerated() {
        let backend = MockBackend::new(vec![MockDevice::controller(3)]);
        backend.fail_at(FailAt::AutoDetach, TransportError::NotSupported);

        let controller =
            Controller::connect_with(&backend, Arc::new(NullSink), idle_options(0)).unwrap();

        assert!(!backend.events().contains(&Event::AutoDetachEnabled));
        assert_eq!(controller.interface_number(), 0);
        controller.close();
    }

    #[test]
    fn test_auto_detach_failure_rolls_back() {
        let backend = MockBackend::new(vec![MockDevice::controller(3)]);
        backend.fail_at(FailAt::AutoDetach, TransportError::Access);

        let err = Controller::connect_with(&backend, Arc::new(NullSink), idle_options(0))
            .unwrap_err();

        assert!(matches!(err, DriverError::Transport(TransportError::Access)));
        assert_eq!(
            backend.releases(),
            vec![Event::DeviceClosed { address: 3 }, Event::ContextClosed]
        );
    }
}

mod teardown {
    use super::*;

    #[test]
    fn test_acquisition_order() {
        let backend = MockBackend::new(vec![MockDevice::controller(7)]);

        let controller =
            Controller::connect_with(&backend, Arc::new(NullSink), ConnectOptions::default())
                .unwrap();

        assert_eq!(
            backend.events(),
            vec![
                Event::ContextOpened { usb_debug: false },
                Event::DeviceOpened { address: 7 },
                Event::AutoDetachEnabled,
                Event::InterfaceClaimed(0),
                Event::StreamOpened {
                    endpoint: 0x81,
                    depth: STREAM_DEPTH
                },
            ]
        );
        assert_eq!(controller.endpoint().address, 0x81);
        controller.close();
    }

    #[test]
    fn test_close_releases_in_reverse_order() {
        let backend = MockBackend::new(vec![MockDevice::controller(7)]);
        let controller =
            Controller::connect_with(&backend, Arc::new(NullSink), ConnectOptions::default())
                .unwrap();

        controller.close();

        assert_eq!(
            backend.releases(),
            vec![
                Event::StreamClosed { endpoint: 0x81 },
                Event::InterfaceReleased(0),
                Event::DeviceClosed { address: 7 },
                Event::ContextClosed,
            ]
        );
    }

    #[test]
    fn test_drop_releases_once() {
        let backend = MockBackend::new(vec![MockDevice::controller(7)]);
        {
            let _controller =
                Controller::connect_with(&backend, Arc::new(NullSink), ConnectOptions::default())
                    .unwrap();
        }

        assert_eq!(backend.releases().len(), 4);
    }

    #[test]
    fn test_release_failure_does_not_stop_teardown() {
        let backend = MockBackend::new(vec![MockDevice::controller(7)]);
        backend.fail_at(FailAt::Release, TransportError::NoDevice);
        let sink = RecordingSink::all();

        let controller = Controller::connect_with(&backend, sink.clone(), idle_options(0)).unwrap();
        controller.close();

        assert_eq!(backend.releases().len(), 4);
        assert_eq!(backend.releases().last(), Some(&Event::ContextClosed));
        assert!(sink.contains("1 release failures"));
    }

    #[test]
    fn test_usb_debug_reaches_context() {
        let backend = MockBackend::new(vec![MockDevice::controller(7)]);

        let controller = Controller::connect_with(&backend, RecordingSink::all(), idle_options(0))
            .unwrap();

        assert_eq!(
            backend.events().first(),
            Some(&Event::ContextOpened { usb_debug: true })
        );
        controller.close();
    }

    #[test]
    fn test_connect_dumps_device_info() {
        let backend = MockBackend::new(vec![MockDevice::controller(7)]);
        let sink = RecordingSink::all();

        let controller = Controller::connect_with(&backend, sink.clone(), idle_options(0)).unwrap();

        assert!(sink.contains("connected to device, device info:"));
        assert!(sink.contains("device speed: Full"));
        assert!(sink.contains("successfully connected to fan controller"));
        controller.close();
    }
}
