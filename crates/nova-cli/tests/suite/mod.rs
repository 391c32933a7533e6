mod test_usage_cli;
