pub mod mock_dispatcher;
